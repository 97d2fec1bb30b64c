//! # Girder Protocol Crate
//!
//! This crate contains the core Scrypto blueprint for the Girder protocol, a collateralized
//! debt position (CDP) engine that mints the gUSD stablecoin against accepted collateral resources.
//!
//! Interest on drawn debt compounds per second through a lazily updated global factor per
//! collateral, and every live position is kept sorted by its collateral-to-debt value ratio
//! so the riskiest positions can always be found first.
//!
//! ## Modules
//!
//! The crate is organized into the following modules:
//!
//! - `girder_component`: Defines the main `Girder` component, which manages collateral types,
//!   positions and their deposit records, gUSD minting/burning, interest accrual and the
//!   per-collateral ratio trees. This is the heart of the protocol's logic.
//! - `events`: Defines the various events emitted by the protocol component, allowing off-ledger
//!   services to track state changes.
//! - `shared_structs`: Contains data structures returned across the component boundary, such as
//!   `Position`, `Deposit` and `CollateralInfoReturn`, promoting code reuse and consistency.

pub mod girder_component;
pub mod events;
pub mod shared_structs;
