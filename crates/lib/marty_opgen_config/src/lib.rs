/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    marty_opgen_config::lib.rs

    Generator configuration: TOML file parameters with command line overlay.

*/

//! The `marty_opgen_config` crate parses the opcode generator's configuration file and overlays
//! command line arguments on top of it. Command line arguments take priority over the
//! configuration file.
//!
//! Features:
//! - `use_bpaf`: Enable BPAF support for command line argument parsing.

mod bpaf_config;

use std::path::{Path, PathBuf};

#[cfg(feature = "use_bpaf")]
use bpaf_config::cli_args;
pub use bpaf_config::CmdLineArgs;

use cfg_if::cfg_if;
use serde_derive::Deserialize;

const fn _default_true() -> bool {
    true
}

fn _default_index_arch() -> Option<String> {
    Some("z80".to_string())
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Generator {
    /// 8-bit architecture that receives the DD/FD index register forms.
    #[serde(default = "_default_index_arch")]
    pub index_arch: Option<String>,
    #[serde(default = "_default_true")]
    pub emit_metadata: bool,
    #[serde(default = "_default_true")]
    pub line_directives: bool,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub undefined_x86: Option<String>,
    #[serde(default)]
    pub undefined_x80: Option<String>,
    #[serde(default)]
    pub undefined_x87: Option<String>,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            index_arch: _default_index_arch(),
            emit_metadata: true,
            line_directives: true,
            log_level: None,
            undefined_x86: None,
            undefined_x80: None,
            undefined_x87: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Output {
    #[serde(default)]
    pub decoder: Option<PathBuf>,
    #[serde(default)]
    pub models: Option<PathBuf>,
    #[serde(default)]
    pub dump_tree: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ConfigFileParams {
    #[serde(default)]
    pub generator: Generator,
    #[serde(default)]
    pub output: Output,
    /// Specification file to process. Only set from the command line.
    #[serde(skip)]
    pub spec: PathBuf,
}

impl ConfigFileParams {
    pub fn overlay(&mut self, shell_args: CmdLineArgs) {
        if let Some(output) = shell_args.output {
            self.output.decoder = Some(output);
        }
        if let Some(list_output) = shell_args.list_output {
            self.output.models = Some(list_output);
        }
        if let Some(index_arch) = shell_args.index_arch {
            self.generator.index_arch = Some(index_arch);
        }
        if let Some(log_level) = shell_args.log_level {
            self.generator.log_level = Some(log_level);
        }

        self.output.dump_tree |= shell_args.dump_tree;
        self.generator.emit_metadata &= !shell_args.no_metadata;
        self.generator.line_directives &= !shell_args.no_line_directives;

        self.spec = shell_args.spec;
    }

    /// Path of the decoder source. Defaults to `<spec stem>.gen.c` next to the spec.
    pub fn decoder_path(&self) -> PathBuf {
        self.output
            .decoder
            .clone()
            .unwrap_or_else(|| self.spec.with_extension("gen.c"))
    }

    /// Path of the processor model list. Defaults to `<spec stem>.list.c` next to the spec.
    pub fn models_path(&self) -> PathBuf {
        self.output
            .models
            .clone()
            .unwrap_or_else(|| self.spec.with_extension("list.c"))
    }
}

pub fn read_config(toml_string: impl AsRef<str>, shell_args: CmdLineArgs) -> Result<ConfigFileParams, anyhow::Error> {
    let mut toml_args: ConfigFileParams = toml::from_str(toml_string.as_ref())?;

    // Command line arguments override config file arguments
    toml_args.overlay(shell_args);
    Ok(toml_args)
}

/// Read the TOML configuration from a file path, parse and overlay command line arguments.
/// A missing file at `default_path` is not an error; a missing file named with `--config_file` is.
pub fn read_config_file<P>(default_path: P) -> Result<ConfigFileParams, anyhow::Error>
where
    P: AsRef<Path>,
{
    let shell_args: CmdLineArgs;

    cfg_if! {
        if #[cfg(feature = "use_bpaf")] {
            log::debug!("Reading command line arguments...");
            shell_args = cli_args().run();
        } else {
            log::debug!("Argument reading disabled...");
            shell_args = CmdLineArgs::default();
        }
    }

    // Allow configuration file path to be overridden by command line argument 'config_file'
    let toml_string = if let Some(configfile_path) = shell_args.config_file.as_ref() {
        std::fs::read_to_string(configfile_path)?
    }
    else if default_path.as_ref().exists() {
        std::fs::read_to_string(default_path)?
    }
    else {
        log::debug!("No configuration file, using defaults");
        String::new()
    };

    read_config(toml_string, shell_args)
}
