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

///
/// CLI flags plus environment-derived addresses, resolved once at startup into
/// a single [ServiceConfig] rather than read ad hoc from every activity.
///
pub mod config {
    use std::net::SocketAddr;
    use std::path::PathBuf;

    use clap::Parser;

    const DEFAULT_MLLP_HOST: &str = "localhost";
    const DEFAULT_MLLP_PORT: u16 = 8440;
    const DEFAULT_PAGER_ADDRESS: &str = "localhost:8441";
    const METRICS_BIND_ADDR: &str = "0.0.0.0:8000";

    #[derive(Parser, Debug)]
    #[command(author, version, about = "AKI streaming inference service", long_about = None)]
    pub struct Cli {
        /// Historical preload CSV, used only when the feature store file is absent.
        #[arg(long, default_value = "/hospital-history/history.csv")]
        pub pathname: PathBuf,
        /// Feature-store SQLite file path.
        #[arg(long = "db-path", default_value = "state/my_database.db")]
        pub db_path: PathBuf,
        /// Metrics snapshot JSON path.
        #[arg(long = "metrics-path", default_value = "state/counter_state.json")]
        pub metrics_path: PathBuf,
        /// Serialized predictor artifact.
        #[arg(long = "model-path", default_value = "trained_model.json")]
        pub model_path: PathBuf,
        /// Bounds the number of consecutive reconnect attempts before giving up entirely.
        /// Unbounded by default, matching the upstream simulator's expectation that the
        /// receiver keeps retrying indefinitely.
        #[arg(long = "max-reconnect-attempts", default_value_t = u32::MAX)]
        pub max_reconnect_attempts: u32,
    }

    #[derive(Debug, Clone)]
    pub struct ServiceConfig {
        pub mllp_host: String,
        pub mllp_port: u16,
        pub pager_address: String,
        pub db_path: PathBuf,
        pub metrics_path: PathBuf,
        pub model_path: PathBuf,
        pub preload_csv_path: PathBuf,
        pub max_reconnect_attempts: u32,
        pub metrics_bind_addr: SocketAddr,
    }

    impl ServiceConfig {
        /// Resolves `MLLP_ADDRESS`/`PAGER_ADDRESS` against the documented defaults and
        /// combines them with the parsed CLI flags.
        pub fn from_env_and_cli(cli: Cli) -> Self {
            let (mllp_host, mllp_port) = match std::env::var("MLLP_ADDRESS") {
                Ok(addr) => parse_host_port(&addr)
                    .unwrap_or_else(|| (DEFAULT_MLLP_HOST.to_string(), DEFAULT_MLLP_PORT)),
                Err(_) => (DEFAULT_MLLP_HOST.to_string(), DEFAULT_MLLP_PORT),
            };
            let pager_address =
                std::env::var("PAGER_ADDRESS").unwrap_or_else(|_| DEFAULT_PAGER_ADDRESS.to_string());

            ServiceConfig {
                mllp_host,
                mllp_port,
                pager_address,
                db_path: cli.db_path,
                metrics_path: cli.metrics_path,
                model_path: cli.model_path,
                preload_csv_path: cli.pathname,
                max_reconnect_attempts: cli.max_reconnect_attempts,
                metrics_bind_addr: METRICS_BIND_ADDR.parse().expect("hardcoded metrics bind address is valid"),
            }
        }
    }

    fn parse_host_port(addr: &str) -> Option<(String, u16)> {
        let (host, port) = addr.rsplit_once(':')?;
        Some((host.to_string(), port.parse().ok()?))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_a_well_formed_host_port_pair() {
            assert_eq!(parse_host_port("mllp-source:8440"), Some(("mllp-source".to_string(), 8440)));
        }

        #[test]
        fn rejects_a_pair_with_a_non_numeric_port() {
            assert_eq!(parse_host_port("mllp-source:abc"), None);
        }
    }
}
