//! Tally - in-memory ledger engine for business networks
//!
//! Tally keeps typed assets and participants in per-type registries and runs
//! transactions against them with all-or-nothing semantics. A business
//! network (type model, named queries, transaction logic) is deployed onto a
//! [`Ledger`].
//!
//! # Quick Start
//!
//! ```ignore
//! use tally::{
//!     BusinessNetwork, FieldDef, FqName, Ledger, LedgerConfig, ModelRegistry, TypeDefinition,
//! };
//!
//! let model = ModelRegistry::new();
//! model.define(TypeDefinition::participant("org.acme", "Trader", "tradeId"))?;
//! model.define(
//!     TypeDefinition::asset("org.acme", "Commodity", "tradingSymbol")
//!         .field(FieldDef::relationship("owner", "org.acme", "Trader")),
//! )?;
//! model.define(
//!     TypeDefinition::transaction("org.acme", "Trade")
//!         .field(FieldDef::relationship("commodity", "org.acme", "Commodity"))
//!         .field(FieldDef::relationship("newOwner", "org.acme", "Trader")),
//! )?;
//!
//! let network = BusinessNetwork::new("trade-network", model).with_logic(
//!     FqName::new("org.acme", "Trade"),
//!     |tx, ctx| {
//!         let mut commodity = ctx.resolve(tx.require_relationship("commodity")?)?;
//!         commodity.set("owner", tx.require_relationship("newOwner")?.clone());
//!         ctx.update(commodity)
//!     },
//! );
//! let ledger = Ledger::deploy(network, LedgerConfig::default())?;
//! ```
//!
//! # Architecture
//!
//! - `tally-core`: values, names, type model, instances, factory, errors
//! - `tally-storage`: registries and consistent multi-registry snapshots
//! - `tally-concurrency`: execution latches and the transaction context
//! - `tally-engine`: executor, query engine, event bus, configuration

// Re-export the public API from tally-engine
pub use tally_engine::*;
