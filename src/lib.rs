//! SoftPoints: an append-only points ledger with a reward engine, a spend/withdrawal gate and
//! fraud-risk scoring, served over actix-web.

pub mod config;
pub mod currency;
pub mod dispatcher;
pub mod fraud;
pub mod gate;
pub mod idgen;
pub mod ledger;
pub mod proto;
pub mod reports;
pub mod responses;
pub mod routes;
pub mod rules;
pub mod session;

#[cfg(feature = "postgres")]
pub mod database;
#[cfg(feature = "postgres")]
mod schema;
