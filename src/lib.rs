//! # Garage Inventory
//!
//! A local-first inventory for a garage: a browser streams camera frames,
//! the server records them and the detections a [`detector::Detector`]
//! finds in them, and an operator reviews those detections into durable
//! inventory items organised by zone and category.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌──────────┐
//! │  Frames  │──▶│ Ingest           │──▶│  SQLite  │
//! │ (upload) │   │ detect+normalize │   │          │
//! └──────────┘   └───────┬──────────┘   └────┬─────┘
//!                        │ publish           │
//!                        ▼                   ▼
//!                 ┌────────────┐      ┌────────────┐
//!                 │  EventHub  │      │   Review   │
//!                 │ (SSE feed) │      │ accept/... │
//!                 └────────────┘      └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! garage init                   # create database, seed categories
//! garage serve                  # start HTTP server
//! garage sessions               # list capture sessions
//! garage review <session_id>    # show open proposals
//! garage items --zone bench     # print inventory
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema and seed data |
//! | [`models`] | Core data types and row mapping |
//! | [`error`] | Error taxonomy |
//! | [`detector`] | Detector capability |
//! | [`normalize`] | Frame size and bbox normalization |
//! | [`geometry`] | Zone polygons |
//! | [`events`] | Per-session event logs |
//! | [`sessions`] | Capture session lifecycle |
//! | [`ingest`] | Frame intake pipeline |
//! | [`review`] | Proposal grouping and resolution |
//! | [`items`] | Inventory CRUD |
//! | [`taxonomy`] | Zones and categories |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod events;
pub mod geometry;
pub mod ingest;
pub mod items;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod review;
pub mod server;
pub mod sessions;
pub mod taxonomy;
