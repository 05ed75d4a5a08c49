// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
pub mod extensions;
pub mod id;
pub mod memory;
pub mod settings;
pub mod traits;

pub use extensions::{ConnectionExtension, Extensions};
pub use id::ObjectId;
pub use traits::*;
