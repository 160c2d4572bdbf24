use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc};

use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::Service,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use log::{info, warn};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};

use crate::{
    config::ProfdConfig,
    metrics::Exporter,
    sampler::Sampler,
    session::{SessionController, SessionError},
};

/// Sampling window used when the request carries no `seconds` param.
const DEFAULT_SECONDS: u64 = 10;

pub struct Server<S> {
    session: Arc<SessionController<S>>,
    metrics: Exporter,
    addr: SocketAddr,
    expose_metrics: bool,
    running: watch::Receiver<bool>,
}

// Not derived so S does not need to be Clone
impl<S> Clone for Server<S> {
    fn clone(&self) -> Self {
        Server {
            session: self.session.clone(),
            metrics: self.metrics.clone(),
            addr: self.addr,
            expose_metrics: self.expose_metrics,
            running: self.running.clone(),
        }
    }
}

impl<S: Sampler> Server<S> {
    pub fn new(
        session: Arc<SessionController<S>>,
        metrics: Exporter,
        config: &ProfdConfig,
        running: watch::Receiver<bool>,
    ) -> Self {
        Server {
            session,
            metrics,
            addr: config.address(),
            expose_metrics: config.expose_metrics(),
            running,
        }
    }

    /// Consume the Server into a task serving the debug endpoints until
    /// shutdown is signalled on the `running` channel.
    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.serve().await {
                warn!("endpoints error: {e}");
            }
        })
    }

    async fn serve(&mut self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Serving profiling endpoints on {}", self.addr);

        loop {
            tokio::select! {
                Ok((stream, _)) = listener.accept() => {
                    let io = TokioIo::new(stream);
                    let s = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = http1::Builder::new().serve_connection(io, s).await {
                            warn!("Error serving connection: {e:?}");
                        }
                    });
                },
                res = self.running.changed() => {
                    if res.is_err() || !*self.running.borrow() {
                        info!("Stopping endpoints...");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn make_response(
        res: StatusCode,
        body: String,
    ) -> Result<Response<Full<Bytes>>, anyhow::Error> {
        Response::builder()
            .status(res)
            .body(Full::new(Bytes::from(body)))
            .map_err(anyhow::Error::new)
    }

    async fn handle_profile(
        &self,
        query: Option<&str>,
    ) -> Result<Response<Full<Bytes>>, anyhow::Error> {
        let Ok(seconds) = parse_seconds(query) else {
            return Self::make_response(
                StatusCode::BAD_REQUEST,
                String::from("Cannot parse seconds param as a number"),
            );
        };

        match self.session.capture(seconds).await {
            Ok(profile) => {
                self.metrics.metrics.profiles_served.inc();
                Response::builder()
                    .header(hyper::header::CONTENT_TYPE, "application/octet-stream")
                    .header(
                        hyper::header::CONTENT_DISPOSITION,
                        "attachment; filename=profile.pb.gz",
                    )
                    .body(Full::new(Bytes::from(profile)))
                    .map_err(anyhow::Error::new)
            }
            Err(SessionError::Sampler(e)) => {
                self.metrics.metrics.profiles_failed.inc();
                warn!("CPU sampler failure: {e}");
                Self::make_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Err(e) => {
                self.metrics.metrics.profiles_failed.inc();
                Self::make_response(StatusCode::BAD_REQUEST, e.to_string())
            }
        }
    }

    fn handle_metrics(&self) -> Result<Response<Full<Bytes>>, anyhow::Error> {
        if !self.expose_metrics {
            return Self::make_response(StatusCode::SERVICE_UNAVAILABLE, String::new());
        }

        self.metrics.encode().map(|buf| {
            let body = Full::new(Bytes::from(buf));
            Response::builder()
                .header(
                    hyper::header::CONTENT_TYPE,
                    "application/openmetrics-text; version=1.0.0; charset=utf-8",
                )
                .body(body)
                .map_err(anyhow::Error::new)
        })?
    }

    fn handle_health_check(&self) -> Result<Response<Full<Bytes>>, anyhow::Error> {
        Self::make_response(StatusCode::OK, String::new())
    }
}

impl<S: Sampler> Service<Request<Incoming>> for Server<S> {
    type Response = Response<Full<Bytes>>;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let s = self.clone();
        Box::pin(async move {
            match (req.method(), req.uri().path()) {
                (&Method::GET, "/debug/pprof/profile") => {
                    s.handle_profile(req.uri().query()).await
                }
                (&Method::GET, "/metrics") => s.handle_metrics(),
                (&Method::GET, "/health_check") => s.handle_health_check(),
                _ => Self::make_response(StatusCode::NOT_FOUND, String::new()),
            }
        })
    }
}

/// Extract the `seconds` query param, falling back to the default
/// window when it is absent.
fn parse_seconds(query: Option<&str>) -> Result<u64, std::num::ParseIntError> {
    let Some(query) = query else {
        return Ok(DEFAULT_SECONDS);
    };

    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == "seconds" {
            return value.parse();
        }
    }

    Ok(DEFAULT_SECONDS)
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::sampler::fake::FakeSampler;

    fn server(sampler: FakeSampler) -> Server<FakeSampler> {
        let (tx, rx) = watch::channel(true);
        // Handlers are exercised directly, no shutdown signal is sent
        std::mem::forget(tx);
        Server::new(
            Arc::new(SessionController::new(sampler)),
            Exporter::new(),
            &ProfdConfig::default(),
            rx,
        )
    }

    async fn body_of(res: Response<Full<Bytes>>) -> Bytes {
        res.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn seconds_param() {
        assert_eq!(parse_seconds(None), Ok(10));
        assert_eq!(parse_seconds(Some("seconds=2")), Ok(2));
        assert_eq!(parse_seconds(Some("debug=1&seconds=30")), Ok(30));
        assert_eq!(parse_seconds(Some("debug=1")), Ok(10));
        assert!(parse_seconds(Some("seconds=abc")).is_err());
        assert!(parse_seconds(Some("seconds=-1")).is_err());
        assert!(parse_seconds(Some("seconds=")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn profile_request_succeeds() {
        let s = server(FakeSampler::with_samples(b"profile".to_vec()));

        let res = s.handle_profile(Some("seconds=2")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[hyper::header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(
            res.headers()[hyper::header::CONTENT_DISPOSITION],
            "attachment; filename=profile.pb.gz"
        );
        assert_eq!(body_of(res).await, b"profile".as_ref());
        assert_eq!(s.metrics.metrics.profiles_served.get(), 1);
    }

    #[tokio::test]
    async fn unparsable_seconds_never_reach_the_controller() {
        let s = server(FakeSampler::with_samples(b"profile".to_vec()));

        let res = s.handle_profile(Some("seconds=abc")).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_of(res).await,
            "Cannot parse seconds param as a number"
        );
        assert!(s.session.sampler().calls().is_empty());
    }

    #[tokio::test]
    async fn overlapping_request_is_rejected() {
        let s = server(FakeSampler::with_samples(b"profile".to_vec()));
        let tag = s.session.start(5).await.unwrap();

        let res = s.handle_profile(Some("seconds=2")).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(res).await, "CPU profiling is already in use");
        assert_eq!(s.metrics.metrics.profiles_failed.get(), 1);

        assert!(s.session.stop(tag).await.is_ok());
    }

    #[tokio::test]
    async fn idle_process_yields_an_empty_capture_error() {
        let s = server(FakeSampler::idle());

        let res = s.handle_profile(Some("seconds=0")).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_of(res).await,
            "No CPU profile samples captured -- app is idle?"
        );
        assert!(!s.session.is_active().await);
    }

    #[tokio::test]
    async fn metrics_disabled_by_default() {
        let s = server(FakeSampler::idle());

        let res = s.handle_metrics().unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_exposition() {
        let (tx, rx) = watch::channel(true);
        std::mem::forget(tx);
        let mut config = ProfdConfig::default();
        config.set_expose_metrics(true);
        let s = Server::new(
            Arc::new(SessionController::new(FakeSampler::idle())),
            Exporter::new(),
            &config,
            rx,
        );

        let res = s.handle_metrics().unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_of(res).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("profd_profiles_served_total 0"));
    }
}
