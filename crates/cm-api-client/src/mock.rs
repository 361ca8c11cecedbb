//! In-memory stand-in for the backend, used for demos and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{ApiClient, ApiError, Method};

type ReplyFn = Arc<dyn Fn(Option<&Value>) -> Result<Value, ApiError> + Send + Sync>;

#[derive(Clone)]
pub enum Reply {
    Json(Value),
    Status { status: u16, body: String },
    Handler(ReplyFn),
}

impl Reply {
    pub fn json(value: Value) -> Self {
        Reply::Json(value)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Reply::Status {
            status,
            body: body.to_owned(),
        }
    }

    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
        Reply::Handler(Arc::new(f))
    }
}

#[derive(Clone)]
struct Route {
    reply: Reply,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct MockApiClient {
    routes: Mutex<HashMap<(Method, String), Route>>,
    calls: Mutex<Vec<(Method, String)>>,
}

impl MockApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<(Method, String), Route>> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn calls_guard(&self) -> MutexGuard<'_, Vec<(Method, String)>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn route(&self, method: Method, path: &str, reply: Reply) {
        self.routes()
            .insert((method, path.to_owned()), Route { reply, delay: None });
    }

    /// Like [`MockApiClient::route`] but the reply is held back for `delay`.
    pub fn route_delayed(&self, method: Method, path: &str, reply: Reply, delay: Duration) {
        self.routes().insert(
            (method, path.to_owned()),
            Route {
                reply,
                delay: Some(delay),
            },
        );
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls_guard().clone()
    }

    pub fn call_count(&self, method: Method, path: &str) -> usize {
        self.calls_guard()
            .iter()
            .filter(|(m, p)| *m == method && p == path)
            .count()
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        self.calls_guard().push((method, path.to_owned()));
        let route = self.routes().get(&(method, path.to_owned())).cloned();
        let Some(route) = route else {
            return Err(ApiError::NoRoute {
                method,
                path: path.to_owned(),
            });
        };

        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }

        match route.reply {
            Reply::Json(value) => Ok(value),
            Reply::Status { status, body } => Err(ApiError::Status {
                status,
                path: path.to_owned(),
                body,
            }),
            Reply::Handler(f) => f(body.as_ref()),
        }
    }
}
