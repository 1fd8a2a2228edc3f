// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod common;
pub mod error;
pub mod object;
pub mod quantity;
pub mod resource;

pub use common::*;
pub use error::*;
pub use object::*;
pub use resource::*;
