//! In-process transport with scripted per-mirror replies.

use crate::netease::client::Transport;
use crate::netease::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Fail,
    /// Never answers within any test timeout.
    Hang,
}

#[derive(Default)]
pub struct ScriptedTransport {
    // (base url, path fragment) -> reply; an empty fragment matches any path
    rules: Mutex<HashMap<(String, String), Reply>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, base: &str, reply: Reply) {
        self.script_path(base, "", reply);
    }

    pub fn script_path(&self, base: &str, fragment: &str, reply: Reply) {
        self.rules
            .lock()
            .unwrap()
            .insert((base.to_string(), fragment.to_string()), reply);
    }

    /// Base URLs contacted, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(b, _)| b.clone()).collect()
    }

    /// Full URLs requested, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, u)| u.clone()).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn lookup(&self, url: &str) -> Option<(String, Reply)> {
        let rules = self.rules.lock().unwrap();
        let mut best: Option<(&(String, String), &Reply)> = None;
        for (key, reply) in rules.iter() {
            let (base, fragment) = key;
            if !url.starts_with(&format!("{base}/")) || !url.contains(fragment.as_str()) {
                continue;
            }
            let better = match best {
                None => true,
                Some(((_, f), _)) => fragment.len() > f.len(),
            };
            if better {
                best = Some((key, reply));
            }
        }
        best.map(|((base, _), reply)| (base.clone(), reply.clone()))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get_json(&self, url: &str) -> Result<Value, ApiError> {
        let Some((base, reply)) = self.lookup(url) else {
            return Err(ApiError::Transport(format!("unscripted url {url}")));
        };
        self.calls.lock().unwrap().push((base, url.to_string()));
        match reply {
            Reply::Json(v) => Ok(v),
            Reply::Fail => Err(ApiError::Transport("connection refused".into())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(ApiError::Transport("hung".into()))
            }
        }
    }
}
