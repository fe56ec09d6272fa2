//! The concrete [`Engine`] adapter, backed by the `bollard` Docker API client.
//! Everything HTTP/unix-socket shaped lives here; the rest of the pipeline
//! only depends on the [`Engine`] trait.

use bollard::container::{AttachContainerOptions, InspectContainerOptions, ListContainersOptions};
use bollard::image::ListImagesOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::{mpsc, oneshot};

use super::{
    AttachHandle, ContainerDetails, ContainerSummary, Engine, EventStatus, EventStream,
    ImageCounts, ReadyAck,
};
use crate::engine::ContainerEvent;
use crate::error::EngineError;

pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    pub fn connect_unix(path: &str) -> Result<Self, EngineError> {
        let docker = Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| EngineError::Connect(e.into()))?;
        Ok(Self { docker })
    }

    pub fn connect_tcp(host: &str, port: &str) -> Result<Self, EngineError> {
        let url = format!("tcp://{host}:{port}");
        let docker = Docker::connect_with_http(&url, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| EngineError::Connect(e.into()))?;
        Ok(Self { docker })
    }
}

fn action_to_status(action: &str) -> EventStatus {
    match action {
        "create" => EventStatus::Create,
        "start" => EventStatus::Start,
        "die" => EventStatus::Die,
        "destroy" => EventStatus::Destroy,
        other => EventStatus::Other(other.to_owned()),
    }
}

#[async_trait::async_trait]
impl Engine for BollardEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Ping(e.into()))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| EngineError::ListContainers(e.into()))?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let id = c.id.unwrap_or_default();
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_owned())
                    .unwrap_or_else(|| id.clone());
                ContainerSummary { id, name }
            })
            .collect())
    }

    async fn list_images(&self) -> Result<ImageCounts, EngineError> {
        let top_level = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| EngineError::ListImages(e.into()))?;
        let all = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(|e| EngineError::ListImages(e.into()))?;

        Ok(ImageCounts {
            images: top_level.len(),
            layers: all.len(),
        })
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| EngineError::Inspect {
                id: id.to_owned(),
                source: e.into(),
            })?;

        let name = details
            .name
            .map(|n| n.trim_start_matches('/').to_owned())
            .unwrap_or_else(|| id.to_owned());
        let tty = details
            .config
            .and_then(|c| c.tty)
            .unwrap_or(false);

        Ok(ContainerDetails {
            id: id.to_owned(),
            name,
            tty,
        })
    }

    async fn events(&self) -> Result<EventStream, EngineError> {
        let stream = self
            .docker
            .events(Some(EventsOptions::<String> {
                ..Default::default()
            }))
            .filter_map(|item| async move {
                let msg = item.ok()?;
                let container_id = msg.actor?.id?;
                let status = action_to_status(&msg.action.unwrap_or_default());
                Some(ContainerEvent { container_id, status })
            });
        Ok(Box::pin(stream))
    }

    async fn attach(&self, id: &str, tty: bool, historical: bool) -> Result<AttachHandle, EngineError> {
        let opts = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(historical),
            ..Default::default()
        };
        let results = self
            .docker
            .attach_container(id, Some(opts))
            .await
            .map_err(|e| EngineError::Attach {
                id: id.to_owned(),
                source: e.into(),
            })?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        let (stdout_tx, stdout_rx) = mpsc::channel(16);
        let (stderr_tx, stderr_rx) = mpsc::channel(16);
        let (done_tx, done_rx) = oneshot::channel();

        // The bollard call above already returned with a live stream, so the
        // engine is ready the moment we can hand back an acknowledgement slot.
        let _ = ready_tx.send(ReadyAck(ack_tx));

        let id = id.to_owned();
        tokio::spawn(async move {
            // Wait for the tailer's acknowledgement before moving bytes, per
            // the attach handshake (§4.3 step 4).
            let _ = ack_rx.await;

            let mut output = results.output;
            let result = loop {
                match output.try_next().await {
                    Ok(Some(bollard::container::LogOutput::StdOut { message })) => {
                        if stdout_tx.send(message).await.is_err() {
                            break Ok(());
                        }
                    }
                    Ok(Some(bollard::container::LogOutput::StdErr { message })) => {
                        if stderr_tx.send(message).await.is_err() {
                            break Ok(());
                        }
                    }
                    Ok(Some(bollard::container::LogOutput::Console { message })) if tty => {
                        if stdout_tx.send(message).await.is_err() {
                            break Ok(());
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break Ok(()),
                    Err(e) => {
                        break Err(EngineError::Attach {
                            id: id.clone(),
                            source: e.into(),
                        })
                    }
                }
            };
            let _ = done_tx.send(result);
        });

        Ok(AttachHandle {
            ready: ready_rx,
            stdout: stdout_rx,
            stderr: stderr_rx,
            done: done_rx,
        })
    }
}
