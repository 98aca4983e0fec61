//! Scripted transport shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    config::{ClientConfig, SharedConfig, UserAgent},
    errors::Error,
    ports::{ApiRequest, ApiResponse, DirectoryTransport},
    Result,
};

type Matcher = Box<dyn Fn(&ApiRequest) -> bool + Send + Sync>;

struct Route {
    matcher: Matcher,
    responses: VecDeque<ApiResponse>,
}

/// Replays canned responses per route. The last response of a route repeats forever.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<(String, ApiRequest)>>,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn route(
        &self,
        matcher: impl Fn(&ApiRequest) -> bool + Send + Sync + 'static,
        responses: Vec<ApiResponse>,
    ) {
        assert!(!responses.is_empty(), "route needs at least one response");
        self.routes.lock().unwrap().push(Route {
            matcher: Box::new(matcher),
            responses: responses.into(),
        });
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub(crate) fn user_agents(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(ua, _)| ua.clone())
            .collect()
    }

    pub(crate) fn sends(&self) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.get("a") == Some("sendTG"))
            .collect()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryTransport for ScriptedTransport {
    async fn post(&self, user_agent: &str, req: &ApiRequest) -> Result<ApiResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((user_agent.to_string(), req.clone()));

        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes.iter_mut().find(|r| (r.matcher)(req)) else {
            return Err(Error::Transport(format!("no scripted response for {req:?}")));
        };
        let resp = if route.responses.len() > 1 {
            route.responses.pop_front()
        } else {
            route.responses.front().cloned()
        };
        resp.ok_or_else(|| Error::Transport("empty route".to_string()))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn query(q: &'static str) -> impl Fn(&ApiRequest) -> bool + Send + Sync {
    move |req| req.get("q") == Some(q)
}

pub(crate) fn send_call() -> impl Fn(&ApiRequest) -> bool + Send + Sync {
    |req| req.get("a") == Some("sendTG")
}

pub(crate) fn ok(body: impl Into<String>) -> ApiResponse {
    ApiResponse {
        status: 200,
        retry_after: None,
        ratelimit_remaining: Some(50),
        ratelimit_reset: Some(30),
        body: body.into(),
    }
}

pub(crate) fn rate_limited(retry_after: u64) -> ApiResponse {
    ApiResponse {
        status: 429,
        retry_after: Some(retry_after),
        ratelimit_remaining: Some(0),
        ratelimit_reset: Some(retry_after),
        body: String::new(),
    }
}

pub(crate) fn queued() -> ApiResponse {
    ok("queued")
}

pub(crate) fn region_xml(region: &str, members: &[&str]) -> ApiResponse {
    ok(format!(
        "<REGION id=\"{region}\">\n<NATIONS>{}</NATIONS>\n</REGION>",
        members.join(":")
    ))
}

pub(crate) fn assembly_members_xml(members: &[&str]) -> ApiResponse {
    ok(format!(
        "<WA council=\"1\">\n<MEMBERS>{}</MEMBERS>\n</WA>",
        members.join(",")
    ))
}

pub(crate) fn delegates_xml(delegates: &[&str]) -> ApiResponse {
    ok(format!(
        "<WA council=\"1\">\n<DELEGATES>{}</DELEGATES>\n</WA>",
        delegates.join(",")
    ))
}

pub(crate) fn new_founds_xml(nations: &[&str]) -> ApiResponse {
    ok(format!(
        "<WORLD>\n<NEWNATIONS>{}</NEWNATIONS>\n</WORLD>",
        nations.join(",")
    ))
}

pub(crate) fn proposals_xml(council: u8, proposals: &[(&str, &[&str])]) -> ApiResponse {
    let body = proposals
        .iter()
        .map(|(id, approvals)| {
            format!(
                "<PROPOSAL id=\"{id}\">\n<APPROVALS>{}</APPROVALS>\n<CATEGORY>Education and Creativity</CATEGORY>\n</PROPOSAL>",
                approvals.join(":")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    ok(format!(
        "<WA council=\"{council}\">\n<PROPOSALS>\n{body}\n</PROPOSALS>\n</WA>"
    ))
}

pub(crate) fn test_config() -> SharedConfig {
    let mut cfg = ClientConfig::new("client-key", UserAgent::new("testlandia", "tests", "0.0.1"));
    cfg.set_delay(30).unwrap();
    cfg.poll_interval = std::time::Duration::from_secs(60);
    SharedConfig::new(cfg)
}
