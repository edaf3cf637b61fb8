//! Engine command syntax per backend
//!
//! All engine-facing argument lists for isolated contexts are built here so
//! that corrections to flag names (mount, working directory, list format,
//! stop/remove semantics) never touch orchestration logic.

use orbit_core::engine::Invocation;
use orbit_core::Backend;
use std::path::Path;

use crate::policy::Directive;

/// Mount point of the project workspace inside every context
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Label marking containers Orbit created as isolated contexts
pub const MANAGED_LABEL: &str = "orbit.managed=true";

const LIST_FORMAT_SANDBOX: &str = "{{.Name}}|{{.Status}}|{{.CreatedAt}}";
const LIST_FORMAT_CONTAINER: &str = "{{.Names}}|{{.Status}}|{{.CreatedAt}}";

fn workspace_mount(workspace: &Path) -> String {
    format!(
        "type=bind,source={},target={}",
        workspace.display(),
        WORKSPACE_MOUNT
    )
}

/// Whether the backend's create command can express `directive`.
///
/// `docker run` has no per-host egress filtering; allow and deny host
/// directives are only realized by the sandbox runtime.
pub fn supports(backend: Backend, directive: &Directive) -> bool {
    match backend {
        Backend::Sandbox => true,
        Backend::Container => {
            !matches!(directive, Directive::AllowHost(_) | Directive::DenyHost(_))
        }
    }
}

pub(crate) fn list(program: &str, backend: Backend) -> Invocation {
    match backend {
        Backend::Sandbox => Invocation::new(program)
            .args(["sandbox", "ls", "--format", LIST_FORMAT_SANDBOX]),
        Backend::Container => {
            let filter = format!("label={MANAGED_LABEL}");
            Invocation::new(program)
                .args(["ps", "-a", "--filter"])
                .arg(filter)
                .args(["--format", LIST_FORMAT_CONTAINER])
        }
    }
}

pub(crate) fn create(
    program: &str,
    backend: Backend,
    name: &str,
    workspace: &Path,
    directives: &[Directive],
    image: &str,
) -> Invocation {
    let flags = directives
        .iter()
        .filter(|d| supports(backend, d))
        .map(Directive::flag);
    match backend {
        Backend::Sandbox => Invocation::new(program)
            .args(["sandbox", "create", "--mount"])
            .arg(workspace_mount(workspace))
            .args(flags)
            .arg(name),
        Backend::Container => {
            let mut inv = Invocation::new(program)
                .args(["run", "-d", "--name", name, "--label", MANAGED_LABEL, "--mount"])
                .arg(workspace_mount(workspace))
                .args(["-w", WORKSPACE_MOUNT]);
            // A read-only root still needs somewhere to write scratch files.
            if directives.contains(&Directive::ReadOnlyRoot) {
                inv = inv.args(["--tmpfs", "/tmp"]);
            }
            inv.args(flags).args([image, "sleep", "infinity"])
        }
    }
}

pub(crate) fn exec(
    program: &str,
    backend: Backend,
    name: &str,
    command: &str,
    working_dir: &str,
) -> Invocation {
    let base = match backend {
        Backend::Sandbox => Invocation::new(program).args(["sandbox", "exec"]),
        Backend::Container => Invocation::new(program).arg("exec"),
    };
    base.args(["-w", working_dir, name, "sh", "-c", command])
}

pub(crate) fn stop(program: &str, backend: Backend, name: &str) -> Invocation {
    match backend {
        Backend::Sandbox => Invocation::new(program).args(["sandbox", "stop", name]),
        Backend::Container => Invocation::new(program).args(["stop", name]),
    }
}

pub(crate) fn remove(program: &str, backend: Backend, name: &str) -> Invocation {
    match backend {
        Backend::Sandbox => Invocation::new(program).args(["sandbox", "rm", "-f", name]),
        Backend::Container => Invocation::new(program).args(["rm", "-f", name]),
    }
}
