//! # minirpc CLI
//!
//! Support code for the `minirpc` binary.
//!
//! ## Key Commands
//!
//! - `minirpc server`: serve the demo [`arith_service`] over TCP or HTTP CONNECT
//! - `minirpc registry`: run a heartbeat registry
//! - `minirpc call`: call a method through discovery (outputs raw JSON for scripting)

use std::time::Duration;

use minirpc_server::Service;
use serde::{Deserialize, Serialize};

/// Arguments of every `Arith` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArithArgs {
    pub num1: i64,
    pub num2: i64,
}

/// Demo service with two methods:
///
/// - `Arith.Sum` replies `num1 + num2`
/// - `Arith.Sleep` waits `num1` milliseconds, then replies `num1 + num2`
pub fn arith_service() -> Service {
    Service::new("Arith")
        .method("Sum", |args: ArithArgs| async move {
            args.num1
                .checked_add(args.num2)
                .ok_or("integer overflow")
        })
        .method("Sleep", |args: ArithArgs| async move {
            let millis = u64::try_from(args.num1).map_err(|_| "negative sleep duration")?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
            args.num1
                .checked_add(args.num2)
                .ok_or("integer overflow")
        })
}
