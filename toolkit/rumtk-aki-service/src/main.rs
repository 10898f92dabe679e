/*
 * rumtk attempts to implement HL7 and medical protocols for interoperability in medicine.
 * This toolkit aims to be reliable, simple, performant, and standards compliant.
 * Copyright (C) 2025  Luis M. Santos, M.D.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

mod config;
mod processor;
mod receiver;
mod service;
mod supervisor;

use std::process::ExitCode;

use clap::Parser;

use config::config::{Cli, ServiceConfig};

#[tokio::main]
async fn main() -> ExitCode {
    rumtk_core::log::logging::init();

    let config = ServiceConfig::from_env_and_cli(Cli::parse());
    tracing::info!(?config, "starting the aki inference service");

    match supervisor::supervisor::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "service exited with an error");
            ExitCode::FAILURE
        }
    }
}
