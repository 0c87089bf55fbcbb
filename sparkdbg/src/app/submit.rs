// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use crate::app::deploy::JobDeployFactory;
use crate::app::deploy::adls_gen2::to_abfs_uri;
use crate::app::errors::AppResult;
use crate::app::ports::{BatchLog, JobSubmissionPort, TelemetryEvent, TelemetryPort};
use crate::app::types::{BatchInfo, ClusterDetail, SubmissionModel, SubmissionParameter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedArtifact {
    pub kind: &'static str,
    pub remote_path: String,
}

/// Deploy-then-submit workflow over the job submission API.
#[derive(Clone)]
pub struct Submitter {
    factory: Arc<JobDeployFactory>,
    jobs: Arc<dyn JobSubmissionPort>,
    telemetry: Arc<dyn TelemetryPort>,
}

impl Submitter {
    pub fn new(
        factory: Arc<JobDeployFactory>,
        jobs: Arc<dyn JobSubmissionPort>,
        telemetry: Arc<dyn TelemetryPort>,
    ) -> Self {
        Self {
            factory,
            jobs,
            telemetry,
        }
    }

    pub fn jobs(&self) -> Arc<dyn JobSubmissionPort> {
        self.jobs.clone()
    }

    pub async fn deploy(
        &self,
        model: &SubmissionModel,
        cluster: &ClusterDetail,
    ) -> AppResult<DeployedArtifact> {
        let telemetry_base = TelemetryEvent {
            cluster: Some(cluster.name.clone()),
            storage_type: Some(model.storage_type.as_str()),
            ..TelemetryEvent::default()
        };
        let deployable = match self.factory.build(model, cluster) {
            Ok(deployable) => deployable,
            Err(err) => {
                self.telemetry.event(
                    "deploy.failed",
                    TelemetryEvent {
                        error_type: Some(err.classification().as_str()),
                        message: Some(err.to_string()),
                        ..telemetry_base
                    },
                );
                return Err(err);
            }
        };
        match deployable.deploy(&model.artifact).await {
            Ok(remote_path) => {
                tracing::info!(
                    kind = deployable.kind(),
                    remote = %remote_path,
                    "artifact deployed"
                );
                self.telemetry.event(
                    "deploy.completed",
                    TelemetryEvent {
                        remote_path: Some(remote_path.clone()),
                        ..telemetry_base
                    },
                );
                Ok(DeployedArtifact {
                    kind: deployable.kind(),
                    remote_path,
                })
            }
            Err(err) => {
                self.telemetry.event(
                    "deploy.failed",
                    TelemetryEvent {
                        error_type: Some(err.classification().as_str()),
                        message: Some(err.to_string()),
                        ..telemetry_base
                    },
                );
                Err(err)
            }
        }
    }

    /// Deploy the artifact and create the batch. With `remote_debug` the
    /// driver and executors start with JDWP agents.
    pub async fn submit(
        &self,
        model: &SubmissionModel,
        cluster: &ClusterDetail,
        remote_debug: bool,
    ) -> AppResult<BatchInfo> {
        let deployed = self.deploy(model, cluster).await?;
        let parameter = submission_parameter(&model.parameter, &deployed, remote_debug);
        let request = parameter.to_batch_request()?;
        let batch = self.jobs.submit_batch(&request).await?;
        tracing::info!(batch_id = batch.id, state = ?batch.state, "batch submitted");
        self.telemetry.event(
            "batch.submitted",
            TelemetryEvent {
                cluster: Some(cluster.name.clone()),
                batch_id: Some(batch.id),
                remote_path: Some(request.file.clone()),
                ..TelemetryEvent::default()
            },
        );
        Ok(batch)
    }

    pub async fn status(&self, batch_id: i64) -> AppResult<BatchInfo> {
        self.jobs.get_batch(batch_id).await
    }

    pub async fn logs(&self, batch_id: i64, from: u64, size: u64) -> AppResult<BatchLog> {
        self.jobs.get_batch_log(batch_id, from, size).await
    }

    pub async fn kill(&self, batch_id: i64) -> AppResult<()> {
        self.jobs.kill_batch(batch_id).await
    }
}

/// Parameter handed to the batch API for an uploaded artifact.
pub fn submission_parameter(
    parameter: &SubmissionParameter,
    deployed: &DeployedArtifact,
    remote_debug: bool,
) -> SubmissionParameter {
    let mut out = parameter.with_file(deployed.remote_path.clone());
    if deployed.kind == "adls_gen2" {
        out = out.with_referenced_paths_transformed(to_abfs_uri);
    }
    if remote_debug {
        out = out.with_remote_debug();
    }
    out
}


#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::testing::ScriptedJobs;
    use super::*;
    use crate::app::deploy::testing::{FixedClock, RecordingHttp, status};
    use crate::app::errors::codes;
    use crate::app::ports::NoopTelemetry;
    use crate::app::types::{StorageAccountType, StorageSettings};

    fn cluster() -> ClusterDetail {
        ClusterDetail {
            name: "c1".to_string(),
            livy_url: "https://c1.azurehdinsight.net/livy".to_string(),
            gateway_url: None,
            username: "admin".to_string(),
            password: Some("pw".to_string()),
            container_log_port: 30060,
            default_storage: None,
        }
    }

    fn gen2_model(artifact: PathBuf) -> SubmissionModel {
        SubmissionModel {
            storage_type: StorageAccountType::AdlsGen2,
            storage: StorageSettings {
                root_path: Some("https://acct.dfs.core.windows.net/fs/SparkSubmission/".to_string()),
                key: Some("c2VjcmV0LWtleQ==".to_string()),
                ..StorageSettings::default()
            },
            parameter: SubmissionParameter {
                cluster_name: "c1".to_string(),
                class_name: "com.example.Main".to_string(),
                jars: vec!["https://acct.dfs.core.windows.net/fs/lib/dep.jar".to_string()],
                ..SubmissionParameter::default()
            },
            artifact,
        }
    }

    fn submitter(http: Arc<RecordingHttp>, jobs: Arc<ScriptedJobs>) -> Submitter {
        let factory = JobDeployFactory::new(http, Arc::new(FixedClock::default()), Duration::ZERO);
        Submitter::new(Arc::new(factory), jobs, Arc::new(NoopTelemetry))
    }

    #[tokio::test]
    async fn gen2_submission_uses_abfss_paths() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("app.jar");
        std::fs::write(&artifact, b"jar").unwrap();
        let jobs = Arc::new(ScriptedJobs::default());
        let submitter = submitter(Arc::new(RecordingHttp::default()), jobs.clone());

        let batch = submitter
            .submit(&gen2_model(artifact), &cluster(), true)
            .await
            .unwrap();

        assert_eq!(batch.id, 42);
        let submitted = jobs.submitted.lock().unwrap();
        assert_eq!(
            submitted[0].file,
            "abfss://fs@acct.dfs.core.windows.net/SparkSubmission/20261018093015/app.jar"
        );
        assert_eq!(
            submitted[0].jars,
            vec!["abfss://fs@acct.dfs.core.windows.net/lib/dep.jar".to_string()]
        );
        assert!(submitted[0].conf["spark.driver.extraJavaOptions"].contains("suspend=y"));
    }

    #[tokio::test]
    async fn upload_failure_skips_submission() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("app.jar");
        std::fs::write(&artifact, b"jar").unwrap();
        let jobs = Arc::new(ScriptedJobs::default());
        let http = Arc::new(RecordingHttp::with_responses(vec![status(404)]));

        let err = submitter(http, jobs.clone())
            .submit(&gen2_model(artifact), &cluster(), false)
            .await
            .unwrap_err();

        assert_eq!(err.code(), codes::PERMISSION_DENIED);
        assert!(jobs.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn non_gen2_paths_are_not_rewritten() {
        let parameter = SubmissionParameter {
            jars: vec!["https://acct.dfs.core.windows.net/fs/lib/dep.jar".to_string()],
            ..SubmissionParameter::default()
        };
        let deployed = DeployedArtifact {
            kind: "blob",
            remote_path: "wasbs://jobs@acct.blob.core.windows.net/SparkSubmission/1/app.jar"
                .to_string(),
        };
        let out = submission_parameter(&parameter, &deployed, false);
        assert_eq!(out.file, deployed.remote_path);
        assert_eq!(out.jars, parameter.jars);
        assert!(out.conf.is_empty());
    }
}
