//! Ad-hoc search relay: one JSON request per stdin line, one JSON response
//! per stdout line.
//!
//! Exit code 1 when the configuration is invalid.
use std::process::ExitCode;

use envconfig::Envconfig;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use bridge_common::config::EnvMsDuration;
use bridge_common::lineproto::LineProtocol;
use bridge_common::solr::SolrClient;

mod query;

use query::{build_query, failure_response, success_response};

#[derive(Envconfig)]
struct Config {
    #[envconfig(default = "http://127.0.0.1:8080/solr")]
    pub solr_url: String,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match Config::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            return ExitCode::from(1);
        }
    };

    let solr = match SolrClient::new(&config.solr_url, config.request_timeout.0) {
        Ok(solr) => solr,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            return ExitCode::from(1);
        }
    };

    let mut protocol = LineProtocol::new();
    while let Some(request) = protocol.next().await {
        let response = match build_query(&request) {
            Some(params) => {
                debug!(?params, "running query");
                match solr.search(&params).await {
                    Ok(engine_response) => success_response(&engine_response),
                    Err(err) => {
                        error!(error = %err, "search request failed");
                        failure_response("Search failed")
                    }
                }
            }
            None => {
                warn!(%request, "missing expected query parameters");
                failure_response("Bad query")
            }
        };

        if let Err(err) = protocol.write(&response).await {
            error!(error = %err, "failed to write response, exiting");
            break;
        }
    }

    ExitCode::SUCCESS
}
