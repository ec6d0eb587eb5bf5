// Export OpenAPI specification as JSON
//
// Usage: cargo run -p courier-server --bin export-openapi > docs/openapi.json

use courier_server::openapi::ApiDoc;

fn main() -> anyhow::Result<()> {
    println!("{}", ApiDoc::to_json()?);
    Ok(())
}
