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

    marty_opgen_config::bpaf_config/mod.rs

    Command line arguments.

*/

use std::path::PathBuf;

#[cfg(feature = "use_bpaf")]
use bpaf::Bpaf;

#[cfg_attr(feature = "use_bpaf", derive(Bpaf))]
#[cfg_attr(feature = "use_bpaf", bpaf(options, version, generate(cli_args)))]
#[derive(Debug, Default)]
pub struct CmdLineArgs {
    #[cfg_attr(feature = "use_bpaf", bpaf(long("config_file"), long("configfile")))]
    pub config_file: Option<PathBuf>,

    /// Decoder source output path
    #[cfg_attr(feature = "use_bpaf", bpaf(short('o'), long("output")))]
    pub output: Option<PathBuf>,

    /// Processor model list output path
    #[cfg_attr(feature = "use_bpaf", bpaf(long("list_output")))]
    pub list_output: Option<PathBuf>,

    #[cfg_attr(feature = "use_bpaf", bpaf(long("index_arch")))]
    pub index_arch: Option<String>,

    #[cfg_attr(feature = "use_bpaf", bpaf(long("log_level")))]
    pub log_level: Option<String>,

    /// Print the decode tries after the propagation passes
    #[cfg_attr(feature = "use_bpaf", bpaf(long("dump_tree"), switch))]
    pub dump_tree: bool,

    #[cfg_attr(feature = "use_bpaf", bpaf(long("no_metadata"), switch))]
    pub no_metadata: bool,

    #[cfg_attr(feature = "use_bpaf", bpaf(long("no_line_directives"), switch))]
    pub no_line_directives: bool,

    /// Instruction set specification
    #[cfg_attr(feature = "use_bpaf", bpaf(positional("SPEC")))]
    pub spec: PathBuf,
}
