#![deny(unused_must_use)]

mod cli;
mod commands;

use clap::Parser;
use cli::Args;
use commands::build::build;
use human_panic::setup_panic;
use log::{debug, error};
use pctiler_core::error::TilerError;
use std::process::ExitCode;

fn main() -> ExitCode {
    setup_panic!();

    let args = Args::parse();

    simple_logger::init_with_level(args.log_level).unwrap();

    match build(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            debug!("{e:?}");
            let code = e.chain().find_map(|cause| cause.downcast_ref::<TilerError>()).map(TilerError::exit_code).unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
