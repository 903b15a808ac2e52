//! Synthesized `/proc` entries. Content is generated on read rather than
//! stored, since it reflects live process state (open FDs, mapped regions).

use crate::context::ExecuteContext;

pub fn is_proc_path(path: &str) -> bool {
    path.starts_with("/proc/self/") || path == "/proc/self"
}

/// Render a synthesized `/proc/self/*` file. Returns `None` for paths under
/// `/proc/self` this build does not model (e.g. `/proc/self/status`), which
/// the VFS layer then reports as `ENOENT`.
pub fn render(path: &str, ctx: &ExecuteContext, exe_path: &str) -> Option<Vec<u8>> {
    match path {
        "/proc/self/exe" => Some(exe_path.as_bytes().to_vec()),
        "/proc/self/cmdline" => {
            let mut out = Vec::new();
            for arg in &ctx.argv {
                out.extend_from_slice(arg.as_bytes());
                out.push(0);
            }
            Some(out)
        }
        "/proc/self/maps" => Some(render_maps(ctx)),
        _ if path.starts_with("/proc/self/fd/") => {
            let fd_str = path.trim_start_matches("/proc/self/fd/");
            let fd: i32 = fd_str.parse().ok()?;
            ctx.fds.get(fd)?;
            Some(format!("fd:{fd}").into_bytes())
        }
        _ => None,
    }
}

fn render_maps(ctx: &ExecuteContext) -> Vec<u8> {
    // One synthesized region per brk/mmap cursor; real guests mostly just
    // grep this for library base addresses, which this build does not need
    // to expose with byte-for-byte accuracy.
    let mut out = String::new();
    out.push_str(&format!(
        "{:08x}-{:08x} rw-p 00000000 00:00 0 [heap]\n",
        ctx.brk_base, ctx.brk_current
    ));
    out.push_str(&format!(
        "{:08x}-{:08x} rw-p 00000000 00:00 0 [mmap]\n",
        crate::context::MMAP_BASE, ctx.mmap_cursor
    ));
    out.into_bytes()
}
