//! Inbound message routing.
//!
//! The transport hands every inbound publish to the router, which matches the
//! topic against the device's configuration topic and commands prefix and
//! dispatches the payload to the registered listener on that listener's
//! executor. Messages on unrecognized topics are dropped.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::callback::{CommandListener, ConfigListener};
use crate::executor::Executor;

pub(crate) struct InboundRouter {
    configuration_topic: String,
    commands_topic_prefix: String,
    config_listener: Option<(Arc<dyn ConfigListener>, Arc<dyn Executor>)>,
    command_listener: Option<(Arc<dyn CommandListener>, Arc<dyn Executor>)>,
}

impl InboundRouter {
    pub(crate) fn new(
        configuration_topic: String,
        commands_topic_prefix: String,
        config_listener: Option<(Arc<dyn ConfigListener>, Arc<dyn Executor>)>,
        command_listener: Option<(Arc<dyn CommandListener>, Arc<dyn Executor>)>,
    ) -> Self {
        Self {
            configuration_topic,
            commands_topic_prefix,
            config_listener,
            command_listener,
        }
    }

    pub(crate) fn has_config_listener(&self) -> bool {
        self.config_listener.is_some()
    }

    pub(crate) fn has_command_listener(&self) -> bool {
        self.command_listener.is_some()
    }

    pub(crate) fn route(&self, topic: &str, payload: &[u8]) {
        if topic == self.configuration_topic {
            if let Some((listener, executor)) = &self.config_listener {
                trace!(topic, len = payload.len(), "dispatching configuration");
                let listener = Arc::clone(listener);
                let payload = payload.to_vec();
                executor.execute(Box::new(move || listener.on_config_received(payload)));
                return;
            }
        } else if let Some(subfolder) = self.command_subfolder(topic) {
            if let Some((listener, executor)) = &self.command_listener {
                trace!(topic, subfolder, len = payload.len(), "dispatching command");
                let listener = Arc::clone(listener);
                let subfolder = subfolder.to_string();
                let payload = payload.to_vec();
                executor
                    .execute(Box::new(move || listener.on_command_received(&subfolder, payload)));
                return;
            }
        }
        debug!(topic, "dropping message on unhandled topic");
    }

    /// The part of `topic` below the commands prefix: `""` for the bare
    /// prefix, `None` when the topic is not under the prefix at all.
    fn command_subfolder<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(&self.commands_topic_prefix)?;
        if rest.is_empty() {
            Some("")
        } else {
            rest.strip_prefix('/')
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InlineExecutor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        configs: Mutex<Vec<Vec<u8>>>,
        commands: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl ConfigListener for Recorder {
        fn on_config_received(&self, payload: Vec<u8>) {
            self.configs.lock().unwrap().push(payload);
        }
    }

    impl CommandListener for Recorder {
        fn on_command_received(&self, subfolder: &str, payload: Vec<u8>) {
            self.commands
                .lock()
                .unwrap()
                .push((subfolder.to_string(), payload));
        }
    }

    fn router(recorder: &Arc<Recorder>) -> InboundRouter {
        let executor: Arc<dyn Executor> = Arc::new(InlineExecutor);
        InboundRouter::new(
            "/devices/d/config".to_string(),
            "/devices/d/commands".to_string(),
            Some((
                Arc::clone(recorder) as Arc<dyn ConfigListener>,
                Arc::clone(&executor),
            )),
            Some((Arc::clone(recorder) as Arc<dyn CommandListener>, executor)),
        )
    }

    #[test]
    fn configuration_topic_reaches_config_listener() {
        let recorder = Arc::new(Recorder::default());
        router(&recorder).route("/devices/d/config", b"cfg");
        assert_eq!(recorder.configs.lock().unwrap().as_slice(), &[b"cfg".to_vec()]);
        assert!(recorder.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn command_subfolder_is_stripped() {
        let recorder = Arc::new(Recorder::default());
        router(&recorder).route("/devices/d/commands/lights", b"on");
        assert_eq!(
            recorder.commands.lock().unwrap().as_slice(),
            &[("lights".to_string(), b"on".to_vec())]
        );
    }

    #[test]
    fn bare_commands_prefix_yields_empty_subfolder() {
        let recorder = Arc::new(Recorder::default());
        router(&recorder).route("/devices/d/commands", b"x");
        assert_eq!(
            recorder.commands.lock().unwrap().as_slice(),
            &[(String::new(), b"x".to_vec())]
        );
    }

    #[test]
    fn nested_subfolders_are_preserved() {
        let recorder = Arc::new(Recorder::default());
        router(&recorder).route("/devices/d/commands/a/b/c", b"x");
        assert_eq!(
            recorder.commands.lock().unwrap().as_slice(),
            &[("a/b/c".to_string(), b"x".to_vec())]
        );
    }

    #[test]
    fn unrelated_topics_are_dropped() {
        let recorder = Arc::new(Recorder::default());
        let router = router(&recorder);
        router.route("/devices/d/commandsextra", b"x");
        router.route("/devices/other/config", b"x");
        router.route("/devices/d/events", b"x");
        assert!(recorder.configs.lock().unwrap().is_empty());
        assert!(recorder.commands.lock().unwrap().is_empty());
    }

    #[test]
    fn without_listeners_everything_is_dropped() {
        let router = InboundRouter::new(
            "/devices/d/config".to_string(),
            "/devices/d/commands".to_string(),
            None,
            None,
        );
        router.route("/devices/d/config", b"cfg");
        router.route("/devices/d/commands/x", b"cmd");
    }
}
