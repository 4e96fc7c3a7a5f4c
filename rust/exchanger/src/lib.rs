// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # COBie-Lite Exchanger
//!
//! Primitives for converting a source repository (typically a building
//! information model) into a COBie entity graph: an exchange session with
//! per-kind key→target caches, and ready-made mappings for the shared
//! entities every conversion needs (categories, external systems and
//! objects).
//!
//! The source repository stays abstract - concrete converters bring their
//! own source access and drive the mappings from it.
//!
//! ```rust
//! use cobie_lite_exchanger::Exchange;
//! use cobie_lite_model::cobie;
//!
//! let mut model = cobie::new_model();
//! let mut exchange = Exchange::new(&mut model);
//! let a = exchange.category("Pr_60_75 : Communications source products").unwrap();
//! let b = exchange.category("Pr_60_75 : Communications source products").unwrap();
//! assert_eq!(a, b);
//! ```

pub mod mappings;

pub use mappings::{Exchange, MappingCache};

use cobie_lite_model::Model;

/// A conversion from one source repository into a COBie model.
///
/// Implementations hold their exchange session and translate whatever the
/// source offers; the trait only fixes the entry point so callers can run
/// converters interchangeably.
pub trait Exchanger {
    type Error;

    /// Run the conversion against the target model.
    fn convert(&mut self, target: &mut Model) -> Result<(), Self::Error>;
}
