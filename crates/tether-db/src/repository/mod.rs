//! # Repository Module
//!
//! Database repository implementations for Tether.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SqliteStorage (tether-sync)                                           │
//! │       │  db.kv().put_json("tether.pending_operations", &queue)         │
//! │       ▼                                                                 │
//! │  KvRepository                                                          │
//! │  ├── get / get_json                                                    │
//! │  └── put / put_json   (upsert)                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  kv_store table                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`kv::KvRepository`] - JSON documents under fixed keys

pub mod kv;
