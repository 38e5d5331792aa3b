//! Translation through the `translator-service` container.

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use secrecy::ExposeSecret;

use super::command::run_checked;
use super::{ToolError, TranslationRequest, Translator};
use crate::jobs::CancellationToken;
use crate::settings::Provider;

/// Runs `docker run --rm -v <root>:/work <image> ...` for each request.
///
/// A request carrying a VPN config runs privileged with the config mounted
/// read-only at `/vpn.conf`; the container brings the tunnel up itself.
#[derive(Debug, Clone)]
pub struct DockerTranslator {
    pub docker: String,
    pub image: String,
}

impl Default for DockerTranslator {
    fn default() -> Self {
        Self {
            docker: "docker".to_string(),
            image: "translator-service:latest".to_string(),
        }
    }
}

/// Container-side path of `input`, which must live under `root`.
fn container_path(root: &Path, input: &Path) -> Result<String, ToolError> {
    let rel = input.strip_prefix(root).map_err(|_| {
        ToolError::Failed(format!(
            "{} is outside the library root {}",
            input.display(),
            root.display()
        ))
    })?;
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    Ok(format!("/work/{}", rel))
}

impl DockerTranslator {
    fn build_args(&self, request: &TranslationRequest<'_>) -> Result<Vec<OsString>, ToolError> {
        let mut mount = OsString::from(request.root.as_os_str());
        mount.push(":/work");

        let mut args: Vec<OsString> = vec!["run".into(), "--rm".into()];
        if request.vpn_config.is_some() {
            args.push("--privileged".into());
        }
        args.push("-v".into());
        args.push(mount);
        if let Some(vpn) = &request.vpn_config {
            let mut vpn_mount = OsString::from(vpn.as_os_str());
            vpn_mount.push(":/vpn.conf:ro");
            args.push("-v".into());
            args.push(vpn_mount);
        }

        args.push(self.image.as_str().into());
        if request.vpn_config.is_some() {
            args.push("--vpn-config".into());
            args.push("/vpn.conf".into());
        }
        args.push("--provider".into());
        args.push(request.provider.as_str().to_lowercase().into());

        let key = request.api_key.expose_secret();
        if !key.is_empty() {
            args.push("--api-key".into());
            args.push(key.into());
        }

        if request.provider == Provider::Azure {
            args.push("--azure-endpoint".into());
            args.push(request.azure_endpoint.into());
            args.push("--azure-region".into());
            args.push(request.azure_region.into());
        }

        args.push("--file".into());
        args.push(container_path(request.root, request.input)?.into());
        args.push("--wait-ms".into());
        args.push(request.wait_ms.to_string().into());
        args.push("--target-lang".into());
        args.push(request.target_lang.into());
        Ok(args)
    }
}

impl Translator for DockerTranslator {
    fn translate(
        &self,
        request: &TranslationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        let mut cmd = Command::new(&self.docker);
        cmd.args(self.build_args(request)?);

        log::info!(
            "Running {} with provider {}{} (args hidden)",
            self.image,
            request.provider,
            if request.vpn_config.is_some() { " over VPN" } else { "" }
        );
        run_checked(&mut cmd, cancel)?;

        if !request.output.exists() {
            return Err(ToolError::Failed(format!(
                "Translator did not write {}",
                request.output.display()
            )));
        }
        Ok(())
    }
}
