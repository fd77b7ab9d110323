//! Shared test doubles for the end-to-end scenarios

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use repowatch::dispatch::Messenger;
use repowatch::error::{DeliveryError, FetchError};
use repowatch::github::{Issue, Release, ResourceClient, StarredRepo};
use repowatch::store::Destination;

type Script<T> = Mutex<HashMap<String, VecDeque<Result<T, FetchError>>>>;

/// GitHub client whose responses are scripted per repository (or per star
/// account). Responses are consumed in order; an exhausted script yields
/// transport errors so a misconfigured test fails loudly.
#[derive(Default)]
pub struct ScriptedGitHub {
    releases: Script<Option<Release>>,
    issues: Script<Option<Issue>>,
    stars: Mutex<VecDeque<Result<Vec<StarredRepo>, FetchError>>>,
    login: Mutex<Option<String>>,
}

impl ScriptedGitHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_release(
        &self,
        owner: &str,
        repo: &str,
        response: Result<Option<Release>, FetchError>,
    ) {
        self.releases
            .lock()
            .unwrap()
            .entry(format!("{}/{}", owner, repo))
            .or_default()
            .push_back(response);
    }

    pub fn push_issue(&self, owner: &str, repo: &str, response: Result<Option<Issue>, FetchError>) {
        self.issues
            .lock()
            .unwrap()
            .entry(format!("{}/{}", owner, repo))
            .or_default()
            .push_back(response);
    }

    pub fn push_stars(&self, response: Result<Vec<StarredRepo>, FetchError>) {
        self.stars.lock().unwrap().push_back(response);
    }

    pub fn set_login(&self, login: &str) {
        *self.login.lock().unwrap() = Some(login.to_string());
    }
}

fn next<T>(script: &Script<T>, key: &str) -> Result<T, FetchError> {
    script
        .lock()
        .unwrap()
        .get_mut(key)
        .and_then(|queue| queue.pop_front())
        .unwrap_or_else(|| {
            Err(FetchError::Transport(format!(
                "no scripted response for {}",
                key
            )))
        })
}

#[async_trait]
impl ResourceClient for ScriptedGitHub {
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        _token: &str,
    ) -> Result<Option<Release>, FetchError> {
        next(&self.releases, &format!("{}/{}", owner, repo))
    }

    async fn latest_open_issue(
        &self,
        owner: &str,
        repo: &str,
        _token: &str,
    ) -> Result<Option<Issue>, FetchError> {
        next(&self.issues, &format!("{}/{}", owner, repo))
    }

    async fn starred_page(
        &self,
        _token: &str,
        _per_page: u8,
    ) -> Result<Vec<StarredRepo>, FetchError> {
        self.stars
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transport("no scripted star page".into())))
    }

    async fn viewer_login(&self, _token: &str) -> Result<String, FetchError> {
        self.login
            .lock()
            .unwrap()
            .clone()
            .ok_or(FetchError::Unauthorized)
    }
}

/// Messenger that records every delivery in order
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(Destination, String)>>,
}

impl RecordingMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(Destination, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn deliver(&self, destination: &Destination, text: &str) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((*destination, text.to_string()));
        Ok(())
    }
}

pub fn release(id: &str, tag: &str) -> Release {
    Release {
        id: id.to_string(),
        tag_name: tag.to_string(),
        name: Some(format!("Release {}", tag)),
        html_url: format!("https://github.com/o/r/releases/tag/{}", tag),
        published_at: None,
    }
}

pub fn issue(id: &str, number: u64, title: &str) -> Issue {
    Issue {
        id: id.to_string(),
        number,
        title: title.to_string(),
        author: "reporter".to_string(),
        author_url: "https://github.com/reporter".to_string(),
        html_url: format!("https://github.com/o/r/issues/{}", number),
        body: Some("Something is broken".to_string()),
    }
}

pub fn starred(id: &str, full_name: &str) -> StarredRepo {
    StarredRepo {
        id: id.to_string(),
        full_name: full_name.to_string(),
        html_url: format!("https://github.com/{}", full_name),
        description: None,
    }
}
