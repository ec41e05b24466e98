//! End-to-end coverage of route dispatch ordering (middleware snapshot
//! captured at registration time) and the frozen-after-startup contract.

use std::sync::{Arc, Mutex};

use aya_core::router::{FnLink, Link, Next, Request, Response, Router};
use async_trait::async_trait;
use bytes::Bytes;

fn recording_mw(calls: Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Arc<dyn Link> {
    struct Recording {
        calls: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    }
    #[async_trait]
    impl Link for Recording {
        async fn call(&self, req: &Request, next: Next<'_>) -> Response {
            self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(self.name);
            next.run(req).await
        }
    }
    Arc::new(Recording { calls, name })
}

fn terminal(calls: Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Arc<dyn Link> {
    FnLink::new(move |_req| {
        calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(name);
        Response::new(200, Bytes::from_static(b"ok"))
    })
}

#[tokio::test]
async fn route_dispatch_reflects_registration_order_and_freeze_blocks_further_changes() {
    let router = Router::new();
    let calls = Arc::new(Mutex::new(Vec::new()));

    router.use_mw(recording_mw(calls.clone(), "A")).expect("use A");
    router.route("GET /x", vec![terminal(calls.clone(), "H1")]).expect("route x");
    router.use_mw(recording_mw(calls.clone(), "B")).expect("use B");
    router.route("GET /y", vec![terminal(calls.clone(), "H2")]).expect("route y");
    router.freeze();

    let resp = router.dispatch("GET", "/x", Request::new("GET", "/x")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(*calls.lock().unwrap(), vec!["A", "H1"]);

    calls.lock().unwrap().clear();
    let resp = router.dispatch("GET", "/y", Request::new("GET", "/y")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(*calls.lock().unwrap(), vec!["A", "B", "H2"]);

    let err = router.route("GET /z", vec![terminal(calls.clone(), "H3")]);
    assert!(err.is_err(), "registration after freeze must be rejected");
    assert_eq!(router.route_count(), 2);
}
