//! services/api/src/bin/openapi.rs
//!
//! Prints the OpenAPI document for the API service, for consumption by
//! client generators and CI checks.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

fn main() {
    match ApiDoc::openapi().to_pretty_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to render OpenAPI document: {}", e);
            std::process::exit(1);
        }
    }
}
