use tracing::{error, info};

use skua_protocol::{
    parse_script_output, script_stderr_msg, SCRIPT_OUTPUT_RETRIES, SCRIPT_OUTPUT_TIMEOUT,
};

use super::item::TransferItem;
use super::DownloadEngine;

impl DownloadEngine {
    /// Fetch and log the stderr of a script entry after its transfer
    /// succeeded. Returns `false` when the script must be treated as failed:
    /// the client answered `err` or nothing, or the script exited non-zero.
    pub(crate) fn log_script_output(&self, remote_name: &str, item: &TransferItem) -> bool {
        let reply = match self.shared.control.send_message_retry(
            &script_stderr_msg(remote_name),
            SCRIPT_OUTPUT_TIMEOUT,
            SCRIPT_OUTPUT_RETRIES,
        ) {
            Ok(reply) => reply,
            Err(e) => {
                error!(script = %item.remote_name, error = %e, "error getting script output");
                return false;
            }
        };

        if reply == "err" {
            error!(script = %item.remote_name, "error getting script output (err response)");
            return false;
        }
        if reply.is_empty() {
            return false;
        }

        let output = parse_script_output(&reply);
        for line in &output.lines {
            if output.exit_code != 0 {
                error!(script = %item.remote_name, "{line}");
            } else {
                info!(script = %item.remote_name, "{line}");
            }
        }
        if output.exit_code != 0 {
            error!(
                script = %item.remote_name,
                exit_code = output.exit_code,
                "script returned a non-zero exit code, failing backup"
            );
            return false;
        }
        true
    }
}
