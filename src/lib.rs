pub mod api;
pub mod chain;
pub mod config;
pub mod db;
pub mod decoder;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use chain::{ChainClient, ChainError, MockChainClient, SolanaRpcClient};
pub use config::Config;
pub use db::{init_db, LedgerReader, Repository};
pub use decoder::{AccountLayout, EventDecoder, LayoutVersion};
pub use domain::{Address, Asset, Decimal, ProgramEvent, Side, TimeMs, Trade};
pub use engine::{AssetSyncService, EventProcessor, PnlService};
pub use error::AppError;
pub use orchestration::{Listener, ListenerConfig};
