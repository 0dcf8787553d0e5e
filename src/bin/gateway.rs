//! HTTP gateway for embedding the router behind a small RPC surface.
//!
//! POST /route   {"text": "...", "hints": {"domain": "devops"}}
//! GET  /skills  registered skill listing
//! GET  /metrics Prometheus text format

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use caproute::{load_tree, metrics, Config, RouteError, RouteReport, Router, TaskRequest};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "caproute-gateway", about = "HTTP gateway for caproute", version)]
struct Args {
    #[arg(long, env = "CAPROUTE_SKILLS_DIR")]
    skills_dir: Option<PathBuf>,
    #[arg(long, env = "CAPROUTE_LISTEN", default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
}

#[derive(Deserialize)]
struct RouteBody {
    text: String,
    #[serde(default)]
    hints: HashMap<String, String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    path: Vec<String>,
}

#[derive(Serialize)]
struct SkillEntry {
    id: String,
    description: String,
    depth: usize,
    invokable: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load()?;
    if args.skills_dir.is_some() {
        config.skills_dir = args.skills_dir;
    }
    let skills_dir = config
        .skills_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("skills"));

    let loaded = load_tree(&skills_dir)?;
    for (path, err) in &loaded.parse_errors {
        eprintln!("warning: skipped {}: {}", path.display(), err);
    }
    if let Err(errors) = loaded.registry.validate() {
        for e in &errors {
            eprintln!("invalid: {}", e);
        }
        anyhow::bail!("refusing to serve with an invalid registry");
    }

    let router = Arc::new(Router::new(
        loaded.registry,
        Arc::new(loaded.handlers),
        &config,
    )?);

    let app = axum::Router::new()
        .route("/route", post(route))
        .route("/skills", get(skills))
        .route("/metrics", get(|| async { metrics::prometheus() }))
        .with_state(router);

    println!("caproute-gateway listening on {}", args.listen);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn route(
    State(router): State<Arc<Router>>,
    Json(body): Json<RouteBody>,
) -> Result<Json<RouteReport>, (StatusCode, Json<ErrorBody>)> {
    let mut request = TaskRequest::new(&body.text);
    for (k, v) in &body.hints {
        request = request.with_hint(k, v);
    }

    // Dispatch may block on the handler; keep it off the async runtime
    let result =
        tokio::task::spawn_blocking(move || router.route_and_dispatch(&request))
            .await
            .map_err(|e| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        error: e.to_string(),
                        path: Vec::new(),
                    }),
                )
            })?;

    match result {
        Ok(report) => Ok(Json(report)),
        Err(RouteError::Resolve(e)) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: e.to_string(),
                path: e.path().to_vec(),
            }),
        )),
        Err(RouteError::Dispatch { source, resolution }) => Err((
            StatusCode::BAD_GATEWAY,
            Json(ErrorBody {
                error: source.to_string(),
                path: resolution.path,
            }),
        )),
    }
}

async fn skills(State(router): State<Arc<Router>>) -> Json<Vec<SkillEntry>> {
    let entries = router
        .registry()
        .walk()
        .into_iter()
        .map(|(node, depth)| SkillEntry {
            id: node.id.clone(),
            description: node.description.clone(),
            depth,
            invokable: node.user_invocable,
        })
        .collect();
    Json(entries)
}
