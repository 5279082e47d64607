//! Idea board: public roadmap with live feedback.
//!
//! ## Overview
//!
//! An owner keeps ideas on a six-column board and shares it through an
//! unguessable public link. Anonymous visitors react with thumbs-up or emoji;
//! the owner's open board animates the reaction immediately and the owner is
//! notified through the configured outbound channels.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP    ┌──────────────────────────────────────────────────┐
//! │  Owner / │ ────────> │  server.rs  (axum Router, start_server)          │
//! │  Viewer  │ <──────── │    ├─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket │    └─ ws.rs   (attach, ping/pong loop)           │
//!                        │         │                                        │
//!                        │         │ Transition → lifecycle::apply()        │
//!                        │         v                                        │
//!                        │  db.rs  (BoardDb, one UPDATE per IdeaPatch)      │
//!                        │         │                                        │
//!                        │         │ feedback recorded                      │
//!                        │         v                                        │
//!                        │  notify/  (NotificationFanout)                   │
//!                        │    ├─ broadcast.rs → registry.rs  (viewers)      │
//!                        │    └─ email / chat / webhook  (spawned tasks)    │
//!                        │                                                  │
//!                        │  cascade.rs  (ideas + board in one transaction,  │
//!                        │               then registry.evict_board)         │
//!                        └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `models`    | `Board`, `Idea`, `Column`, `RiceScore`, feedback types    |
//! | `lifecycle` | Pure idea transitions producing one `IdeaPatch`           |
//! | `registry`  | Per-board viewer buckets, owner or public audience        |
//! | `broadcast` | `BoardEvent` envelope + failure-isolating dispatcher      |
//! | `gate`      | `FeedbackGate` trait and fixed-window limiter             |

pub mod api;
pub mod broadcast;
pub mod cascade;
pub mod db;
pub mod gate;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod registry;
pub mod server;
pub mod ws;
