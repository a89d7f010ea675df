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


//! RON configuration files.

use std::fs;
use std::path::Path;

use anyhow::Context;
use reclaim_core::ThrottleConfig;

/// Parses and validates a RON document. Missing fields take their defaults.
pub fn parse_config(text: &str) -> anyhow::Result<ThrottleConfig> {
    let config: ThrottleConfig = ron::from_str(text).context("malformed RON configuration")?;
    config.validate().context("configuration rejected")?;
    Ok(config)
}

/// Reads, parses and validates the configuration file at `path`.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<ThrottleConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = parse_config(&text).with_context(|| format!("in {}", path.display()))?;
    log::info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// Writes `config` to `path` as pretty-printed RON.
pub fn save_config(path: impl AsRef<Path>, config: &ThrottleConfig) -> anyhow::Result<()> {
    let path = path.as_ref();
    let pretty_config = ron::ser::PrettyConfig::default().indentor("  ".to_string());
    let text = ron::ser::to_string_pretty(config, pretty_config)
        .context("failed to serialize configuration")?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
