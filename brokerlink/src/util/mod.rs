// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
pub mod deadline;
pub mod validators;

pub use deadline::{Deadline, TimeoutError};
