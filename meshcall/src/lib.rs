// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! meshcall is the client-side core of an RPC framework.
//!
//! It turns a logical method call into an [`invocation::Invocation`] dispatched through a
//! single [`client::Invoker`] contract, and keeps a [`registry::ServiceDirectory`] of live
//! instances current as registry pushes flow through the [`observer::EventBus`].
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod context;
pub mod error;
pub mod invocation;
pub mod observer;
pub mod registry;

pub use error::{BoxError, Error};
