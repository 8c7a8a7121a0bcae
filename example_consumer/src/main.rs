//! Example consumer: a SPA server with a `users` model behind cookie sessions.
//!
//! Run from repo root: `CONFIG_PATH=config.yaml cargo run -p example-consumer`

use axum::extract::Request;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use webapp_sdk::{
    controller, load_config, view, AppError, Command, Count, Definition, Envelope, Field, FieldType, Methods,
    ReqData, SessionManager, SqlParam, Statement, Webapp,
};

struct Users {
    list: Statement,
    count: Statement,
    insert: Command,
}

type UsersSlot = Arc<OnceLock<Users>>;

fn users_table() -> Definition {
    Definition::new(
        "users",
        vec![
            Field::new("name", FieldType::Varchar).length(64).unique(),
            Field::new("age", FieldType::Int).nullable(),
        ],
    )
}

fn users_model(slot: UsersSlot) -> Definition {
    users_table().with_init(move |gw| {
        let slot = slot.clone();
        Box::pin(async move {
            let def = users_table();
            let users = Users {
                list: gw.prepare_stmt("SELECT %FIELDS% FROM %TABLE% ORDER BY id", &def).await?,
                count: gw.prepare_stmt("SELECT COUNT(*) FROM %TABLE%", &def).await?,
                insert: gw.make_cmd("INSERT INTO %TABLE% (name, age) VALUES (?, ?)", &def),
            };
            let mut total = Count::default();
            users.count.call(&mut total, &[]).await?;
            tracing::info!(users = total.0, "users model ready");
            let _ = slot.set(users);
            Ok::<_, AppError>(())
        })
    })
}

async fn json_body(req: Request) -> Result<Value, AppError> {
    let raw = axum::body::to_bytes(req.into_body(), 64 * 1024)
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| AppError::BadRequest(e.to_string()))
}

fn users_routes(slot: UsersSlot) -> Methods {
    let list_slot = slot.clone();
    let list = view(move |_req: Request, data: ReqData| {
        let slot = list_slot.clone();
        async move {
            let users = slot.get().ok_or_else(|| AppError::NotFound("users".into()))?;
            let mut rows: Vec<(i64, String, Option<i32>)> = Vec::new();
            users.list.call(&mut rows, &[]).await?;
            let rows: Vec<Value> = rows
                .into_iter()
                .map(|(id, name, age)| json!({ "id": id, "name": name, "age": age }))
                .collect();
            tracing::debug!(session = ?data.get(webapp_sdk::session::SESSION_KEY), "listing users");
            Ok::<_, AppError>(Envelope::json(json!(rows)))
        }
    });
    let create = controller(move |req: Request, _data: ReqData| {
        let slot = slot.clone();
        async move {
            let users = slot.get().ok_or_else(|| AppError::NotFound("users".into()))?;
            let body = json_body(req).await?;
            let name = body["name"]
                .as_str()
                .ok_or_else(|| AppError::BadRequest("name is required".into()))?;
            let params = [SqlParam::from(name), SqlParam::from_json(&body["age"])];
            let done = users.insert.call(&params).await?;
            Ok::<_, AppError>(Envelope::json(json!({ "id": done.last_insert_id() })))
        }
    });
    Methods::new().get(list).post(create)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("webapp_sdk=info,example_consumer=info")),
        )
        .init();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".into());
    let config = load_config(&config_path)?;
    let mut app = Webapp::init(config).await?;

    let users = UsersSlot::default();
    app.register_models(&[users_model(users.clone())]).await?;

    let sessions = SessionManager::new(Duration::from_secs(30 * 60), ["/login", "/health", "/ready", "/version"]);
    let password = std::env::var("DEMO_PASSWORD").unwrap_or_default();
    app.add_middleware(sessions.clone());
    app.register(
        "/login",
        Methods::new().post(sessions.login_controller(move |req: Request| {
            let password = password.clone();
            async move {
                let body = json_body(req).await.ok()?;
                let user = body["username"].as_str()?.to_string();
                (!password.is_empty() && body["password"].as_str() == Some(password.as_str())).then_some(user)
            }
        })),
    );
    app.register("/api/users", users_routes(users));
    app.register_common_routes();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };
    app.serve(shutdown, Duration::from_secs(10)).await?;
    Ok(())
}
