//! Service descriptors
//!
//! A [`Service`] is a named set of methods. Each method is registered with a typed
//! async handler; the descriptor erases the argument and reply types behind a
//! codec-driven decode/encode step so the dispatcher can work on raw body bytes.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use minirpc_common::transport::Codec;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Handler future yielding the encoded reply, or the error text for `Header::error`.
pub type PreparedCall = Pin<Box<dyn Future<Output = Result<Vec<u8>, String>> + Send>>;

type Prepare = Box<dyn Fn(Codec, &[u8]) -> Result<PreparedCall, String> + Send + Sync>;

/// Returns true when `name` starts with an ASCII uppercase letter.
pub fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

/// One callable method of a service.
pub struct MethodType {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    num_calls: AtomicU64,
    prepare: Prepare,
}

impl MethodType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// Number of times the handler has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    /// Decodes `body` into the argument type and invokes the handler.
    ///
    /// A decode failure returns the error text without invoking the handler,
    /// and without counting a call.
    pub fn prepare(&self, codec: Codec, body: &[u8]) -> Result<PreparedCall, String> {
        let call = (self.prepare)(codec, body)?;
        self.num_calls.fetch_add(1, Ordering::Relaxed);
        Ok(call)
    }
}

/// A named collection of methods.
///
/// # Example
///
/// ```
/// use minirpc_server::Service;
///
/// let service = Service::new("Arith")
///     .method("Double", |n: i64| async move { Ok::<_, String>(n * 2) });
/// assert!(service.find_method("Double").is_some());
/// ```
pub struct Service {
    name: String,
    methods: HashMap<String, MethodType>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Registers a method handler.
    ///
    /// # Arguments
    ///
    /// * `name` - Method name; names not starting with an ASCII uppercase letter are skipped
    /// * `handler` - Async function from the decoded argument to the reply or an error
    ///
    /// # Returns
    ///
    /// The service, for chaining
    pub fn method<A, R, E, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        if !is_exported(name) {
            tracing::debug!(service = %self.name, method = name, "skipping unexported method");
            return self;
        }

        let prepare: Prepare = Box::new(move |codec: Codec, body: &[u8]| {
            let args: A = codec.decode(body).map_err(|e| e.to_string())?;
            let fut = handler(args);
            let call: PreparedCall = Box::pin(async move {
                match fut.await {
                    Ok(reply) => codec.encode(&reply).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            });
            Ok(call)
        });

        self.methods.insert(
            name.to_string(),
            MethodType {
                name: name.to_string(),
                arg_type: std::any::type_name::<A>(),
                reply_type: std::any::type_name::<R>(),
                num_calls: AtomicU64::new(0),
                prepare,
            },
        );
        tracing::debug!(service = %self.name, method = name, "registered method");
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodType> {
        self.methods.get(name)
    }

    /// Methods sorted by name.
    pub fn methods(&self) -> Vec<&MethodType> {
        let mut methods: Vec<_> = self.methods.values().collect();
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        methods
    }
}
