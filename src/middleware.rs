//! Request admission predicates, evaluated in registration order before a handler runs.

use crate::response::Envelope;
use async_trait::async_trait;
use axum::http::request::Parts;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-request string map shared by the middleware chain and the handler.
pub type ReqData = HashMap<String, String>;

/// `None` admits the request; `Some` denies it and is written instead of the handler's response.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn admit(&self, parts: &Parts, data: &mut ReqData) -> Option<Envelope>;
}

#[async_trait]
impl<F> Middleware for F
where
    F: Fn(&Parts, &mut ReqData) -> Option<Envelope> + Send + Sync,
{
    async fn admit(&self, parts: &Parts, data: &mut ReqData) -> Option<Envelope> {
        self(parts, data)
    }
}

#[derive(Clone, Default)]
pub struct MiddlewareChain {
    links: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        MiddlewareChain::default()
    }

    pub fn push<M: Middleware + 'static>(&mut self, middleware: M) {
        self.links.push(Arc::new(middleware));
    }

    pub fn push_arc(&mut self, middleware: Arc<dyn Middleware>) {
        self.links.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// First denial wins; later links are not consulted.
    pub async fn run(&self, parts: &Parts, data: &mut ReqData) -> Option<Envelope> {
        for link in &self.links {
            if let Some(denial) = link.admit(parts, data).await {
                return Some(denial);
            }
        }
        None
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain").field("len", &self.links.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn parts() -> Parts {
        Request::builder().uri("/x").body(()).unwrap().into_parts().0
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
        deny: bool,
    }

    #[async_trait]
    impl Middleware for Counting {
        async fn admit(&self, _parts: &Parts, data: &mut ReqData) -> Option<Envelope> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            data.insert(format!("seen{n}"), "1".into());
            self.deny.then(|| Envelope::text(403, "no"))
        }
    }

    #[tokio::test]
    async fn empty_chain_admits() {
        let chain = MiddlewareChain::new();
        assert!(chain.run(&parts(), &mut ReqData::new()).await.is_none());
    }

    #[tokio::test]
    async fn denial_stops_later_links() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut chain = MiddlewareChain::new();
        for deny in [false, true, false] {
            chain.push(Counting {
                calls: calls.clone(),
                deny,
            });
        }
        let mut data = ReqData::new();
        let denial = chain.run(&parts(), &mut data).await;
        assert!(matches!(denial, Some(Envelope::Text { code: 403, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(data.len(), 2);
    }

    #[tokio::test]
    async fn closures_share_request_data() {
        let mut chain = MiddlewareChain::new();
        chain.push(|_: &Parts, data: &mut ReqData| -> Option<Envelope> {
            data.insert("user".into(), "alice".into());
            None
        });
        chain.push(|parts: &Parts, data: &mut ReqData| -> Option<Envelope> {
            data.insert("path".into(), parts.uri.path().to_string());
            None
        });
        let mut data = ReqData::new();
        assert!(chain.run(&parts(), &mut data).await.is_none());
        assert_eq!(data["user"], "alice");
        assert_eq!(data["path"], "/x");
    }
}
