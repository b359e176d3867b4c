//! Subscription pipeline and its collaborators

pub mod adoption;
pub mod download;
pub mod ffmpeg;
pub mod history;
pub mod language;
pub mod local_index;
pub mod logging;
pub mod mediathek;
pub mod nfo;
pub mod paths;
pub mod quality;
pub mod retry;
pub mod runner;
pub mod scanner;
pub mod search;
pub mod subscription_processor;
pub mod text_utils;
pub mod title_parser;
pub mod validator;

pub use adoption::{AdoptionInfo, AdoptionService};
pub use download::{DownloadJob, DownloadQueue};
pub use history::{HistoryStore, MemoryHistoryStore};
pub use mediathek::MediathekClient;
pub use quality::{MemoryQualityCache, QualityCache};
pub use runner::SubscriptionRunner;
pub use search::{ResultItem, SearchClient};
pub use subscription_processor::SubscriptionProcessor;
pub use title_parser::{ParsedTitle, TitleParser};
