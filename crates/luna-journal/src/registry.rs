// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Journal function registry.
//!
//! Journal rows name the function to replay as a stable string key such as
//! `OSImage.pack_n_build_osimage` or `Ha.set_master`. Handlers are registered
//! at startup; a key that was never registered is rejected both when a
//! request is originated and when a replayed row is applied.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use luna_core::LunaError;
use serde::de::DeserializeOwned;
use tracing::debug;

/// A decoded journal row as seen by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalCall {
    pub function: String,
    pub object: String,
    pub param: String,
    pub payload: serde_json::Value,
    pub masteronly: bool,
    /// Request id on the originating controller.
    pub misc: String,
    pub sendby: String,
}

impl JournalCall {
    /// Deserialize the payload into the handler's body type.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, LunaError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| LunaError::Journal {
            message: format!("malformed payload for {}", self.function),
            source: Some(Box::new(e)),
        })
    }
}

type Handler = Arc<dyn Fn(JournalCall) -> BoxFuture<'static, Result<(), LunaError>> + Send + Sync>;

/// Maps function keys to async handlers.
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: DashMap<String, Handler>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`, replacing any earlier registration.
    pub fn register<F, Fut>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(JournalCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), LunaError>> + Send + 'static,
    {
        let key = key.into();
        debug!(function = %key, "journal function registered");
        self.handlers
            .insert(key, Arc::new(move |call| Box::pin(handler(call))));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Invoke the handler registered for `call.function`.
    pub async fn call(&self, call: JournalCall) -> Result<(), LunaError> {
        // Clone the handler out so no map shard lock is held across the await.
        let handler = self
            .handlers
            .get(&call.function)
            .map(|h| h.value().clone())
            .ok_or_else(|| LunaError::UnknownFunction(call.function.clone()))?;
        handler(call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn call(function: &str) -> JournalCall {
        JournalCall {
            function: function.to_string(),
            object: "img1".to_string(),
            param: String::new(),
            payload: serde_json::json!({"force": true}),
            masteronly: false,
            misc: "req-1".to_string(),
            sendby: "ctrl1".to_string(),
        }
    }

    #[tokio::test]
    async fn registered_handler_is_invoked() {
        let registry = FunctionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        registry.register("OSImage.pack_osimage", move |call| {
            let counter = counter.clone();
            async move {
                assert_eq!(call.object, "img1");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        registry.call(call("OSImage.pack_osimage")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.keys(), vec!["OSImage.pack_osimage"]);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let registry = FunctionRegistry::new();
        let err = registry.call(call("Node.delete")).await.unwrap_err();
        assert!(matches!(err, LunaError::UnknownFunction(ref f) if f == "Node.delete"));
        assert!(!registry.contains("Node.delete"));
    }

    #[test]
    fn body_decodes_payload() {
        #[derive(serde::Deserialize)]
        struct Body {
            force: bool,
        }
        let body: Body = call("x").body().unwrap();
        assert!(body.force);
    }
}
