pub mod error;
pub mod util;
pub mod config;
pub mod event;
pub mod identifier;
pub mod filter;
pub mod store;
pub mod field;
pub mod template;
pub mod renderers;
pub mod cursor;
pub mod page;
pub mod query;
pub mod element;
pub mod form;

pub use config::HnConfig;
pub use cursor::PageLocation;
pub use error::HnError;
pub use event::{Event, Tag, UnsignedEvent};
pub use filter::{build_filter, Filter, QueryDescriptor};
pub use form::{FormData, SubmitOutcome};
pub use page::Page;
pub use query::{ContextScope, QueryContext, QueryState};
pub use store::{EventStore, KeySigner, MemoryStore};
