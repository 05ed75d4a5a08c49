// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Claims-based security for links: token providers and the per-connection CBS node
#[deny(unused_imports)]
mod traits;
pub use traits::*;

pub mod cbs;
pub use cbs::{CbsError, CbsLink};

mod shared_access_signature;
pub use shared_access_signature::{
  SharedAccessSignatureTokenProvider, DEFAULT_TOKEN_TIME_TO_LIVE, SAS_TOKEN_TYPE,
};
