pub use std::sync::Arc;

pub use alloy_primitives::{Address, Bytes, TxHash, U256};
pub use alloy_rpc_client::ReqwestClient;
pub use eyre::{Context, ContextCompat, Result};
pub use tokio::time::{Duration, Instant};
pub use tracing::{debug, error, info, trace, warn};
