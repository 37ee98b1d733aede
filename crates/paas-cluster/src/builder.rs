//! Image-build executor — drives run-to-completion build jobs.
//!
//! Each build becomes one job running a kaniko-style builder container
//! that clones the git context and pushes the image. The job and its pod
//! carry a `build-id` label so status events and logs can be traced back
//! to the owning build.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use paas_domain::error::{Error, Result};
use paas_domain::ports::{BuildExecutor, BuildStatusCallback};
use paas_domain::types::{Build, BuildStatus, ImageRepo};

use crate::api::ClusterApi;
use crate::model::{
    Container, EnvVar, JobConditionKind, JobSpec, JobState, Labels, PodTemplate, RestartPolicy,
    Volume, VolumeMount,
};

/// Label carrying the owning build's UUID on jobs and their pods.
pub const BUILD_ID_LABEL: &str = "paas.lane/build-id";

/// Finished jobs are garbage-collected after an hour.
const JOB_TTL_SECONDS: u32 = 3600;

/// Builder-side configuration shared by all build jobs.
#[derive(Debug, Clone, Default)]
pub struct BuildJobConfig {
    /// Image of the kaniko-style builder container.
    pub builder_image: String,
    /// Secret holding `.dockerconfigjson` push credentials.
    pub registry_secret: Option<String>,
    pub registry_mirrors: Vec<String>,
    pub insecure_registries: Vec<String>,
    /// Remote cache repository for layer reuse.
    pub cache_repo: Option<String>,
    pub http_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

/// Submits, cancels, and observes build jobs through the cluster API.
pub struct JobBuildExecutor {
    api: Arc<dyn ClusterApi>,
    config: BuildJobConfig,
}

impl JobBuildExecutor {
    pub fn new(api: Arc<dyn ClusterApi>, config: BuildJobConfig) -> Self {
        Self { api, config }
    }

    /// Consume job events and forward status changes to the callback,
    /// keyed by the `build-id` label. Runs until shutdown flips or the
    /// event stream closes.
    pub async fn watch(&self, callback: BuildStatusCallback, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.api.watch_jobs();
        info!("build job watcher started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let Some(build_id) = event.job.labels.get(BUILD_ID_LABEL) else {
                        continue;
                    };
                    if let Some((status, log)) = job_to_status(&event.job) {
                        debug!(build_id, ?status, "build job status change");
                        callback(build_id.clone(), status, log).await;
                    }
                }
            }
        }
        info!("build job watcher stopped");
    }

    fn build_job(&self, build: &Build, repo: &ImageRepo) -> JobSpec {
        let mut labels = Labels::new();
        labels.insert(BUILD_ID_LABEL.to_string(), build.id.clone());

        let mut args = vec![
            format!(
                "--context={}#{}",
                git_context(&repo.git_repo),
                classify_git_ref(&build.git_ref)
            ),
            format!("--destination={}", build.image_tag),
            "--cache=true".to_string(),
        ];
        if let Some(cache_repo) = &self.config.cache_repo {
            args.push(format!("--cache-repo={cache_repo}"));
        }
        if !repo.context_dir.is_empty() && repo.context_dir != "." {
            args.push(format!("--context-sub-path={}", repo.context_dir));
        }
        if let Some(dockerfile) = &repo.dockerfile {
            args.push(format!("--dockerfile={dockerfile}"));
        }
        for mirror in &self.config.registry_mirrors {
            args.push(format!("--registry-mirror={mirror}"));
        }
        for registry in &self.config.insecure_registries {
            args.push(format!("--insecure-registry={registry}"));
            args.push(format!("--skip-tls-verify-registry={registry}"));
        }

        let mut container = Container {
            name: "kaniko".to_string(),
            image: self.config.builder_image.clone(),
            args,
            ..Container::default()
        };

        if let Some(proxy) = &self.config.http_proxy {
            for name in ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"] {
                container.env.push(EnvVar {
                    name: name.to_string(),
                    value: proxy.clone(),
                });
            }
            if let Some(no_proxy) = &self.config.no_proxy {
                for name in ["NO_PROXY", "no_proxy"] {
                    container.env.push(EnvVar {
                        name: name.to_string(),
                        value: no_proxy.clone(),
                    });
                }
            }
        }

        let mut volumes = Vec::new();
        if let Some(secret) = &self.config.registry_secret {
            container.volume_mounts.push(VolumeMount {
                name: "docker-config".to_string(),
                mount_path: "/kaniko/.docker".to_string(),
                read_only: true,
            });
            volumes.push(Volume {
                name: "docker-config".to_string(),
                secret_name: secret.clone(),
                items: vec![(".dockerconfigjson".to_string(), "config.json".to_string())],
            });
        }

        JobSpec {
            name: job_name(&build.id),
            labels: labels.clone(),
            backoff_limit: 0,
            ttl_seconds_after_finished: JOB_TTL_SECONDS,
            template: PodTemplate {
                labels,
                service_account: None,
                restart_policy: RestartPolicy::Never,
                containers: vec![container],
                volumes,
            },
        }
    }
}

#[async_trait]
impl BuildExecutor for JobBuildExecutor {
    async fn submit(&self, build: &Build, repo: &ImageRepo) -> Result<String> {
        let job = self.build_job(build, repo);
        self.api
            .create_job(&job)
            .await
            .map_err(|e| Error::internal(format!("submit build job: {e}")))?;
        info!(build_id = %build.id, job = %job.name, "build job submitted");
        Ok(job.name)
    }

    async fn cancel(&self, job_name: &str) -> Result<()> {
        // An already-collected job counts as cancelled.
        self.api
            .delete_job(job_name)
            .await
            .map_err(|e| Error::internal(format!("delete build job {job_name}: {e}")))?;
        Ok(())
    }

    async fn get_logs(&self, build_id: &str) -> Result<String> {
        self.api
            .pod_logs(BUILD_ID_LABEL, build_id)
            .await
            .map_err(|e| Error::internal(format!("get build pod logs: {e}")))
    }
}

fn job_name(build_id: &str) -> String {
    format!("kaniko-{}", build_id.replace('-', ""))
}

/// Rewrite http(s) git URLs to the git protocol the builder clones over.
fn git_context(git_repo: &str) -> String {
    if let Some(rest) = git_repo.strip_prefix("https://") {
        format!("git://{rest}")
    } else if let Some(rest) = git_repo.strip_prefix("http://") {
        format!("git://{rest}")
    } else {
        git_repo.to_string()
    }
}

/// Turn a user-supplied ref into the form the builder checks out:
/// commit hashes pass through, `v<digit>…` becomes a tag ref, anything
/// else a branch ref. Refs already under `refs/` are left alone.
fn classify_git_ref(git_ref: &str) -> String {
    if git_ref.starts_with("refs/") || is_commit_hash(git_ref) {
        git_ref.to_string()
    } else if looks_like_tag(git_ref) {
        format!("refs/tags/{git_ref}")
    } else {
        format!("refs/heads/{git_ref}")
    }
}

fn is_commit_hash(git_ref: &str) -> bool {
    (7..=40).contains(&git_ref.len())
        && git_ref
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn looks_like_tag(git_ref: &str) -> bool {
    let mut chars = git_ref.chars();
    chars.next() == Some('v') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

fn job_to_status(job: &JobState) -> Option<(BuildStatus, String)> {
    for cond in &job.conditions {
        if cond.status {
            match cond.kind {
                JobConditionKind::Complete => return Some((BuildStatus::Succeeded, String::new())),
                JobConditionKind::Failed => {
                    return Some((BuildStatus::Failed, cond.message.clone()))
                }
            }
        }
    }
    if job.active > 0 {
        return Some((BuildStatus::Running, String::new()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCluster;
    use crate::model::JobCondition;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_build(id: &str, git_ref: &str) -> Build {
        Build {
            id: id.into(),
            image_repo: "agent-service".into(),
            git_ref: git_ref.into(),
            image_tag: "harbor.local/inner-bot/agent-service:abc123".into(),
            status: BuildStatus::Pending,
            job_name: None,
            log: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_repo() -> ImageRepo {
        ImageRepo {
            name: "agent-service".into(),
            registry: "harbor.local/inner-bot/agent-service".into(),
            git_repo: "https://github.com/example/platform.git".into(),
            context_dir: "apps/agent-service".into(),
            dockerfile: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn executor(cluster: &MemoryCluster, config: BuildJobConfig) -> JobBuildExecutor {
        JobBuildExecutor::new(Arc::new(cluster.clone()), config)
    }

    #[test]
    fn git_ref_classification() {
        // Hex of length 7–40 is a commit and passes through.
        assert_eq!(classify_git_ref("abc1234"), "abc1234");
        assert_eq!(classify_git_ref(&"a1".repeat(20)), "a1".repeat(20));
        // v<digit> is a tag.
        assert_eq!(classify_git_ref("v1.2.3"), "refs/tags/v1.2.3");
        assert_eq!(classify_git_ref("v2"), "refs/tags/v2");
        // Everything else is a branch.
        assert_eq!(classify_git_ref("main"), "refs/heads/main");
        assert_eq!(classify_git_ref("abc123"), "refs/heads/abc123"); // too short for a hash
        assert_eq!(classify_git_ref("vnext"), "refs/heads/vnext"); // no digit after v
        assert_eq!(
            classify_git_ref("feature/lanes"),
            "refs/heads/feature/lanes"
        );
        // Explicit refs are untouched.
        assert_eq!(classify_git_ref("refs/tags/v9"), "refs/tags/v9");
    }

    #[test]
    fn git_context_rewrites_http_schemes() {
        assert_eq!(
            git_context("https://github.com/example/repo.git"),
            "git://github.com/example/repo.git"
        );
        assert_eq!(
            git_context("http://internal.git/repo.git"),
            "git://internal.git/repo.git"
        );
        assert_eq!(
            git_context("git://github.com/example/repo.git"),
            "git://github.com/example/repo.git"
        );
    }

    #[test]
    fn job_spec_assembly() {
        let cluster = MemoryCluster::new();
        let exec = executor(
            &cluster,
            BuildJobConfig {
                builder_image: "harbor.local/tools/kaniko:latest".into(),
                registry_secret: Some("harbor-secret".into()),
                registry_mirrors: vec!["mirror.local".into()],
                insecure_registries: vec!["harbor.local".into()],
                cache_repo: Some("harbor.local/cache".into()),
                http_proxy: Some("http://proxy:3128".into()),
                no_proxy: Some("10.0.0.0/8".into()),
            },
        );

        let build = test_build("0a1b2c3d-0000-0000-0000-000000000000", "main");
        let job = exec.build_job(&build, &test_repo());

        assert_eq!(job.name, "kaniko-0a1b2c3d000000000000000000000000");
        assert_eq!(job.backoff_limit, 0);
        assert_eq!(job.ttl_seconds_after_finished, 3600);
        assert_eq!(job.labels.get(BUILD_ID_LABEL).unwrap(), &build.id);
        assert_eq!(job.template.restart_policy, RestartPolicy::Never);

        let container = &job.template.containers[0];
        assert_eq!(container.image, "harbor.local/tools/kaniko:latest");
        let args = &container.args;
        assert!(args.contains(&"--context=git://github.com/example/platform.git#refs/heads/main".to_string()));
        assert!(args.contains(&"--destination=harbor.local/inner-bot/agent-service:abc123".to_string()));
        assert!(args.contains(&"--cache=true".to_string()));
        assert!(args.contains(&"--cache-repo=harbor.local/cache".to_string()));
        assert!(args.contains(&"--context-sub-path=apps/agent-service".to_string()));
        assert!(args.contains(&"--registry-mirror=mirror.local".to_string()));
        assert!(args.contains(&"--insecure-registry=harbor.local".to_string()));
        assert!(args.contains(&"--skip-tls-verify-registry=harbor.local".to_string()));

        assert!(container.env.iter().any(|e| e.name == "HTTPS_PROXY"));
        assert!(container.env.iter().any(|e| e.name == "no_proxy"));

        assert_eq!(job.template.volumes[0].secret_name, "harbor-secret");
        assert_eq!(container.volume_mounts[0].mount_path, "/kaniko/.docker");
    }

    #[test]
    fn job_spec_minimal_config_omits_extras() {
        let cluster = MemoryCluster::new();
        let exec = executor(
            &cluster,
            BuildJobConfig {
                builder_image: "kaniko:latest".into(),
                ..BuildJobConfig::default()
            },
        );
        let mut repo = test_repo();
        repo.context_dir = String::new();

        let job = exec.build_job(&test_build("b-1", "v1.0.0"), &repo);
        let container = &job.template.containers[0];
        assert!(container
            .args
            .iter()
            .any(|a| a.ends_with("#refs/tags/v1.0.0")));
        assert!(!container.args.iter().any(|a| a.starts_with("--context-sub-path")));
        assert!(container.env.is_empty());
        assert!(job.template.volumes.is_empty());
    }

    #[tokio::test]
    async fn submit_creates_the_job() {
        let cluster = MemoryCluster::new();
        let exec = executor(
            &cluster,
            BuildJobConfig {
                builder_image: "kaniko:latest".into(),
                ..BuildJobConfig::default()
            },
        );

        let build = test_build("11111111-2222-3333-4444-555555555555", "main");
        let job_name = exec.submit(&build, &test_repo()).await.unwrap();
        assert_eq!(job_name, "kaniko-11111111222233334444555555555555");
        assert!(cluster.job(&job_name).is_some());
    }

    #[tokio::test]
    async fn submit_failure_propagates() {
        let cluster = MemoryCluster::new();
        cluster.fail_next_job_create("namespace quota exceeded");
        let exec = executor(
            &cluster,
            BuildJobConfig {
                builder_image: "kaniko:latest".into(),
                ..BuildJobConfig::default()
            },
        );

        let err = exec
            .submit(&test_build("b-1", "main"), &test_repo())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("namespace quota exceeded"));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let cluster = MemoryCluster::new();
        let exec = executor(
            &cluster,
            BuildJobConfig {
                builder_image: "kaniko:latest".into(),
                ..BuildJobConfig::default()
            },
        );

        let build = test_build("b-1", "main");
        let job_name = exec.submit(&build, &test_repo()).await.unwrap();
        exec.cancel(&job_name).await.unwrap();
        assert!(cluster.job(&job_name).is_none());
        // Second cancel finds nothing and still succeeds.
        exec.cancel(&job_name).await.unwrap();
    }

    #[test]
    fn job_status_mapping() {
        let mut job = JobState {
            name: "kaniko-x".into(),
            labels: Labels::new(),
            active: 0,
            conditions: Vec::new(),
        };
        assert_eq!(job_to_status(&job), None);

        job.active = 1;
        assert_eq!(job_to_status(&job), Some((BuildStatus::Running, String::new())));

        job.conditions = vec![JobCondition {
            kind: JobConditionKind::Failed,
            status: true,
            message: "builder exited 1".into(),
        }];
        assert_eq!(
            job_to_status(&job),
            Some((BuildStatus::Failed, "builder exited 1".into()))
        );

        job.conditions = vec![JobCondition {
            kind: JobConditionKind::Complete,
            status: true,
            message: String::new(),
        }];
        assert_eq!(job_to_status(&job), Some((BuildStatus::Succeeded, String::new())));

        // False conditions are not terminal.
        job.conditions = vec![JobCondition {
            kind: JobConditionKind::Failed,
            status: false,
            message: String::new(),
        }];
        job.active = 0;
        assert_eq!(job_to_status(&job), None);
    }

    #[tokio::test]
    async fn watcher_delivers_events_by_build_id() {
        let cluster = MemoryCluster::new();
        let exec = Arc::new(executor(
            &cluster,
            BuildJobConfig {
                builder_image: "kaniko:latest".into(),
                ..BuildJobConfig::default()
            },
        ));

        let seen: Arc<Mutex<Vec<(String, BuildStatus, String)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: BuildStatusCallback = Arc::new(move |id, status, log| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push((id, status, log));
            })
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.watch(callback, shutdown_rx).await })
        };
        // Give the watcher a beat to subscribe.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut labels = Labels::new();
        labels.insert(BUILD_ID_LABEL.to_string(), "build-1".to_string());
        cluster.push_job_update(JobState {
            name: "kaniko-x".into(),
            labels: labels.clone(),
            active: 1,
            conditions: Vec::new(),
        });
        cluster.push_job_update(JobState {
            name: "kaniko-x".into(),
            labels: labels.clone(),
            active: 0,
            conditions: vec![JobCondition {
                kind: JobConditionKind::Complete,
                status: true,
                message: String::new(),
            }],
        });
        // A job without the label is ignored.
        cluster.push_job_update(JobState {
            name: "unrelated".into(),
            labels: Labels::new(),
            active: 1,
            conditions: Vec::new(),
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        watcher.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ("build-1".into(), BuildStatus::Running, String::new()));
        assert_eq!(
            seen[1],
            ("build-1".into(), BuildStatus::Succeeded, String::new())
        );
    }
}
