//! In-memory [`RepositoryStore`] used by unit tests
//!
//! Records every call, counts repository generations so replacements are
//! observable, and can simulate read-path lag, transport failures and panics.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::store::{Repository, RepositoryStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Describe(String),
    Create(String),
    Delete { name: String, force: bool },
    PutLifecyclePolicy { name: String, policy_text: String },
}

impl Call {
    fn op(&self) -> &'static str {
        match self {
            Call::Describe(_) => "describe",
            Call::Create(_) => "create",
            Call::Delete { .. } => "delete",
            Call::PutLifecyclePolicy { .. } => "put_lifecycle_policy",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::Describe(_))
    }
}

#[derive(Debug, Clone)]
struct FakeRepo {
    generation: u64,
    policy: Option<String>,
}

#[derive(Default)]
struct State {
    repos: HashMap<String, FakeRepo>,
    generations: u64,
    calls: Vec<Call>,
    visibility_lag: u32,
    /// Previous existence still served by the read path, with remaining reads
    stale: HashMap<String, (bool, u32)>,
    failing: HashSet<&'static str>,
    panicking: HashSet<&'static str>,
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

fn describe_repo(name: &str) -> Repository {
    Repository {
        name: name.to_string(),
        arn: format!("arn:aws:ecr:us-east-1:123456789012:repository/{}", name),
        uri: format!("123456789012.dkr.ecr.us-east-1.amazonaws.com/{}", name),
    }
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing repository (generation 1)
    pub fn with_repository(self, name: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.generations += 1;
            let generation = state.generations;
            state.repos.insert(
                name.to_string(),
                FakeRepo {
                    generation,
                    policy: None,
                },
            );
        }
        self
    }

    /// Reads keep reporting the pre-mutation state for `reads` describes
    pub fn with_visibility_lag(self, reads: u32) -> Self {
        self.state.lock().unwrap().visibility_lag = reads;
        self
    }

    /// Reads never observe mutations
    pub fn never_converging(self) -> Self {
        self.with_visibility_lag(u32::MAX)
    }

    /// Every call of the given kind fails with a transport error
    pub fn failing(self, op: &'static str) -> Self {
        self.state.lock().unwrap().failing.insert(op);
        self
    }

    /// Every call of the given kind panics
    pub fn panicking(self, op: &'static str) -> Self {
        self.state.lock().unwrap().panicking.insert(op);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn describe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Describe(_)))
            .count()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(Call::is_mutation)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().unwrap().repos.contains_key(name)
    }

    pub fn generation(&self, name: &str) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(name)
            .map(|repo| repo.generation)
    }

    pub fn policy(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(name)
            .and_then(|repo| repo.policy.clone())
    }

    /// Record a call and apply injected failures
    fn record(&self, call: Call) -> Result<(), StoreError> {
        let op = call.op();
        let (fail, panic) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            (state.failing.contains(op), state.panicking.contains(op))
        };
        if panic {
            panic!("injected panic in {}", op);
        }
        if fail {
            return Err(StoreError::Transport(anyhow::anyhow!(
                "injected transport failure in {}",
                op
            )));
        }
        Ok(())
    }

    fn mark_stale(state: &mut State, name: &str, previously_existed: bool) {
        if state.visibility_lag > 0 {
            let lag = state.visibility_lag;
            state
                .stale
                .insert(name.to_string(), (previously_existed, lag));
        }
    }
}

#[async_trait]
impl RepositoryStore for FakeStore {
    async fn describe(&self, name: &str) -> Result<Option<Repository>, StoreError> {
        self.record(Call::Describe(name.to_string()))?;

        let mut state = self.state.lock().unwrap();
        if let Some((previously_existed, remaining)) = state.stale.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(previously_existed.then(|| describe_repo(name)));
            }
        }
        Ok(state.repos.contains_key(name).then(|| describe_repo(name)))
    }

    async fn create(&self, name: &str) -> Result<Repository, StoreError> {
        self.record(Call::Create(name.to_string()))?;

        let mut state = self.state.lock().unwrap();
        if state.repos.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        state.generations += 1;
        let generation = state.generations;
        state.repos.insert(
            name.to_string(),
            FakeRepo {
                generation,
                policy: None,
            },
        );
        Self::mark_stale(&mut state, name, false);
        Ok(describe_repo(name))
    }

    async fn delete(&self, name: &str, force: bool) -> Result<(), StoreError> {
        self.record(Call::Delete {
            name: name.to_string(),
            force,
        })?;

        let mut state = self.state.lock().unwrap();
        if state.repos.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Self::mark_stale(&mut state, name, true);
        Ok(())
    }

    async fn put_lifecycle_policy(
        &self,
        name: &str,
        policy_text: &str,
    ) -> Result<(), StoreError> {
        self.record(Call::PutLifecyclePolicy {
            name: name.to_string(),
            policy_text: policy_text.to_string(),
        })?;

        let mut state = self.state.lock().unwrap();
        match state.repos.get_mut(name) {
            Some(repo) => {
                repo.policy = Some(policy_text.to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }
}
