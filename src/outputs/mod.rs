//! Run artefacts written next to the ledgers.
//!
//! # Submodules
//!
//! - [`json`]: writes the per-site [`RunSummary`](crate::models::RunSummary)
//!
//! # Output Structure
//!
//! ```text
//! <base>/
//! ├── raw/
//! │   └── <site-folder>/        # downloaded documents
//! └── logs/
//!     ├── log_<site-folder>.csv # ledger (WHO sites use `logs_`)
//!     └── run_<site-folder>.json
//! ```

pub mod json;
