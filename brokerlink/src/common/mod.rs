// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
pub mod authentication;
pub mod capabilities;
pub mod connection_string;
pub mod entity_path;
pub mod protocol;
