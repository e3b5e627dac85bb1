use std::time::Instant;
use surf::middleware::{Middleware, Next};
use surf::{Client, Request, Response, Result};

/// Surf middleware that logs every outgoing request and its timing.
pub struct SurfLogging;

#[surf::utils::async_trait]
impl Middleware for SurfLogging {
    async fn handle(&self, req: Request, client: Client, next: Next<'_>) -> Result<Response> {
        let method = req.method();
        let url = req.url().clone();
        log::debug!("-> {} {}", method, url);

        let start = Instant::now();
        let response = next.run(req, client).await?;
        let elapsed = start.elapsed();

        log::debug!("<- {} {} ({} in {:?})", method, url, response.status(), elapsed);
        Ok(response)
    }
}
