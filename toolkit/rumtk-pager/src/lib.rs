/*
 * rumtk attempts to implement HL7 and medical protocols for interoperability in medicine.
 * This toolkit aims to be reliable, simple, performant, and standards compliant.
 * Copyright (C) 2025  Luis M. Santos, M.D.
 *
 * This library is free software; you can redistribute it and/or
 * modify it under the terms of the GNU Lesser General Public
 * License as published by the Free Software Foundation; either
 * version 2.1 of the License, or (at your option) any later version.
 *
 * This library is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
 * Lesser General Public License for more details.
 *
 * You should have received a copy of the GNU Lesser General Public
 * License along with this library; if not, write to the Free Software
 * Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA  02110-1301  USA
 */

///
/// Pages the on-call system on a positive AKI prediction. The wire contract is
/// a plain `POST /page` with the MRN as the raw request body — there is no
/// response schema to parse, only a status code to check.
///
pub mod pager {
    use std::time::Duration;

    use thiserror::Error;

    /// Bounds how long the processor can be suspended waiting on the pager so a
    /// wedged on-call endpoint cannot stall the ack-gate forever.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Error, Debug)]
    pub enum PagerError {
        #[error("pager request failed: {0}")]
        Transport(#[from] reqwest::Error),
        #[error("pager responded with non-success status {0}")]
        UnsuccessfulStatus(reqwest::StatusCode),
    }

    #[derive(Clone)]
    pub struct Pager {
        client: reqwest::Client,
        address: String,
    }

    impl Pager {
        /// `address` is a bare `host:port` pair, matching `PAGER_ADDRESS` (no scheme).
        pub fn new(address: impl Into<String>) -> Self {
            let client = reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client with only a timeout configured should always build");
            Pager { client, address: address.into() }
        }

        ///
        /// Sends `mrn` to `http://<address>/page`. A non-2xx response is reported as
        /// [PagerError::UnsuccessfulStatus] rather than silently swallowed, so the
        /// caller can count it as an unsuccessful pager request the same way it
        /// counts a transport-level failure.
        ///
        pub async fn page(&self, mrn: &str) -> Result<(), PagerError> {
            let response = self
                .client
                .post(format!("http://{}/page", self.address))
                .body(mrn.to_string())
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::OK {
                Ok(())
            } else {
                Err(PagerError::UnsuccessfulStatus(response.status()))
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn reports_a_non_200_response_as_unsuccessful() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("POST", "/page")
                .with_status(500)
                .create_async()
                .await;

            let pager = Pager::new(server.host_with_port());
            let result = pager.page("497030").await;
            mock.assert_async().await;
            assert!(matches!(result, Err(PagerError::UnsuccessfulStatus(_))));
        }

        #[tokio::test]
        async fn succeeds_on_a_200_response_with_the_mrn_as_the_body() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("POST", "/page")
                .match_body("497030")
                .with_status(200)
                .create_async()
                .await;

            let pager = Pager::new(server.host_with_port());
            pager.page("497030").await.expect("200 response should be Ok");
            mock.assert_async().await;
        }
    }
}
