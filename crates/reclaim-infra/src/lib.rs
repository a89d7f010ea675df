// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Concrete implementations of the collaborators the controller consumes.
//!
//! - [`telemetry::SysinfoSampler`]: OS and process memory statistics through
//!   the `sysinfo` crate.
//! - [`config`]: RON configuration files for [`reclaim_core::ThrottleConfig`].

#![warn(missing_docs)]

pub mod config;
pub mod telemetry;

pub use config::{load_config, parse_config, save_config};
pub use telemetry::SysinfoSampler;
