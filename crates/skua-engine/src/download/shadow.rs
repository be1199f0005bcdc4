use tracing::error;

use skua_protocol::{start_shadowcopy_msg, stop_shadowcopy_msg, DONE_REPLY, SHADOW_COPY_TIMEOUT};

use super::DownloadEngine;

impl DownloadEngine {
    /// Ask the client to create a shadow copy for `path`. Runs synchronously
    /// on the engine thread, so snapshot control naturally serializes with
    /// transfers. Failures are logged and never take the engine offline.
    pub(crate) fn start_shadowcopy(&self, path: &str) {
        let msg = start_shadowcopy_msg(path, &self.shared.cfg.server_token);
        if let Err(e) = self
            .shared
            .control
            .send_message(&msg, DONE_REPLY, SHADOW_COPY_TIMEOUT)
        {
            error!(
                client = %self.shared.cfg.client_name,
                path,
                error = %e,
                "activating shadow copy failed"
            );
        }
    }

    pub(crate) fn stop_shadowcopy(&self, path: &str) {
        let msg = stop_shadowcopy_msg(path, &self.shared.cfg.server_token);
        if let Err(e) = self
            .shared
            .control
            .send_message(&msg, DONE_REPLY, SHADOW_COPY_TIMEOUT)
        {
            error!(
                client = %self.shared.cfg.client_name,
                path,
                error = %e,
                "removing shadow copy failed"
            );
        }
    }
}
