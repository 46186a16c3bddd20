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

    opgen_cli::lib.rs

    Reads the configuration, runs the generator and writes its outputs.

*/

//! Command line frontend for the opcode generator.

use std::path::Path;

use anyhow::{bail, Context};

use marty_opgen::{GenContext, GenOptions, UndefinedMarkers};
use marty_opgen_config::ConfigFileParams;

pub const DEFAULT_CONFIG: &str = "./opgen.toml";

fn file_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Generator options from the resolved configuration.
pub fn gen_options(config: &ConfigFileParams) -> GenOptions {
    let defaults = UndefinedMarkers::default();
    let generator = &config.generator;
    GenOptions {
        index_arch: generator.index_arch.clone(),
        emit_metadata: generator.emit_metadata,
        line_directives: generator.line_directives,
        source_name: file_name(&config.spec),
        output_name: file_name(&config.decoder_path()),
        undefined: UndefinedMarkers {
            x86: generator.undefined_x86.clone().unwrap_or(defaults.x86),
            x80: generator.undefined_x80.clone().unwrap_or(defaults.x80),
            x87: generator.undefined_x87.clone().unwrap_or(defaults.x87),
        },
    }
}

fn init_logging(config: &ConfigFileParams) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = &config.generator.log_level {
        builder.parse_filters(level);
    }
    // Logging may already be set up by a caller
    let _ = builder.try_init();
}

/// Generate the decoder and model list for the configured specification.
pub fn generate(config: &ConfigFileParams) -> anyhow::Result<()> {
    if config.spec.as_os_str().is_empty() {
        bail!("No specification file given");
    }
    let options = gen_options(config);

    let text = std::fs::read_to_string(&config.spec)
        .with_context(|| format!("Failed to read specification file {}", config.spec.display()))?;
    let ctx = GenContext::build(&text, &options)
        .with_context(|| format!("Failed to process {}", config.spec.display()))?;

    if config.output.dump_tree {
        print!("{}", ctx.dump());
    }

    let decoder_path = config.decoder_path();
    let decoder = ctx.generate_decoder(&options)?;
    std::fs::write(&decoder_path, &decoder.text)
        .with_context(|| format!("Failed to write {}", decoder_path.display()))?;
    log::info!("Wrote decoder to {}", decoder_path.display());

    if !decoder.missing.is_empty() {
        let missing: Vec<&str> = decoder.missing.iter().map(String::as_str).collect();
        println!("Missing operations: {}", missing.join(", "));
    }

    if options.emit_metadata {
        let models_path = config.models_path();
        let models = ctx.generate_models()?;
        std::fs::write(&models_path, &models.text)
            .with_context(|| format!("Failed to write {}", models_path.display()))?;
        log::info!("Wrote processor models to {}", models_path.display());
        println!("Missing features: {:?}", models.missing);
    }
    Ok(())
}

pub fn run() {
    let config = match marty_opgen_config::read_config_file(DEFAULT_CONFIG) {
        Ok(config) => config,
        Err(e) => match e.downcast_ref::<std::io::Error>() {
            Some(e) => {
                eprintln!("Error reading configuration file:\n{}", e);
                std::process::exit(1);
            }
            None => {
                eprintln!(
                    "Failed to parse configuration file. There may be a typo or otherwise invalid toml:\n{}",
                    e
                );
                std::process::exit(1);
            }
        },
    };

    init_logging(&config);

    if let Err(e) = generate(&config) {
        log::error!("{:?}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_gen_options() {
        let mut config = ConfigFileParams::default();
        config.spec = PathBuf::from("cpu/instructions.txt");
        config.generator.undefined_x80 = Some("X80_UNDEFINED();".to_string());
        config.generator.line_directives = false;

        let options = gen_options(&config);
        assert_eq!(options.source_name, "cpu/instructions.txt");
        assert_eq!(options.output_name, "cpu/instructions.gen.c");
        assert_eq!(options.undefined.x80, "X80_UNDEFINED();");
        assert_eq!(options.undefined.x86, "UNDEFINED();");
        assert!(!options.line_directives);
        assert_eq!(options.index_arch.as_deref(), Some("z80"));
    }

    #[test]
    fn test_missing_spec_is_an_error() {
        assert!(generate(&ConfigFileParams::default()).is_err());
        let config = ConfigFileParams {
            spec: PathBuf::from("/nonexistent/spec.txt"),
            ..Default::default()
        };
        let e = generate(&config).unwrap_err();
        assert!(format!("{:#}", e).contains("Failed to read specification file"));
    }
}
