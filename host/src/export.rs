//! Export writers for the downstream imaging pipeline.
//!
//! Two consumers exist: a pose table (fixed identity quaternion plus a
//! metric translation per sample) and a minimal ffmpeg-style log whose
//! timestamps let the pipeline line rail time up with camera time. Both
//! schemas are owned downstream; nothing here is load-bearing beyond the
//! column order and the `time=` stamp format.

use std::io::{self, Write};

use crate::session::RailSession;

/// Pose rows at the caller's sample times (normally the radar frame
/// timestamps). Quaternion is the identity; the rail only translates.
pub fn write_pose_csv<W: Write>(
    out: &mut W,
    session: &RailSession,
    times_rel: &[f64],
) -> io::Result<()> {
    writeln!(out, "qx,qy,qz,qw,tx,ty,tz")?;
    let step_x = session.axis_config(0).step_m;
    let step_y = session.axis_config(1).step_m;
    for (x, y) in session.sample(times_rel) {
        writeln!(
            out,
            "0,0,0,1,{:.9},{:.9},{:.9}",
            x * step_x,
            y * step_y,
            session.z_m()
        )?;
    }
    Ok(())
}

/// Debug variant: one pose row per segment boundary instead of per sample
/// time, which makes overwrite splices visible by eye.
pub fn write_boundary_pose_csv<W: Write>(out: &mut W, session: &RailSession) -> io::Result<()> {
    let mut times: Vec<f64> = Vec::new();
    for axis in 0..2 {
        for segment in session.axis(axis).segments() {
            times.push(segment.t_start);
            times.push(segment.t_end);
        }
    }
    times.sort_by(|a, b| a.total_cmp(b));
    times.dedup();
    write_pose_csv(out, session, &times)
}

/// Fake ffmpeg stderr covering the session duration, for the pipeline's
/// rail/camera time alignment pass.
pub fn write_fake_ffmpeg_log<W: Write>(
    out: &mut W,
    session: &RailSession,
    fps: f64,
) -> io::Result<()> {
    let duration = session.end_time();
    writeln!(out, "Input #0, rail, from 'positioner':")?;
    writeln!(
        out,
        "  Duration: {}, start: 0.000000, bitrate: N/A",
        timestamp(duration)
    )?;
    let frames = (duration * fps).round() as u64;
    writeln!(
        out,
        "frame={frames:>6} fps={fps:>3.0} q=-1.0 Lsize=N/A time={} bitrate=N/A speed=1x",
        timestamp(duration)
    )?;
    Ok(())
}

/// `HH:MM:SS.cc`, the ffmpeg duration format.
fn timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let whole = seconds as u64;
    let centis = ((seconds - whole as f64) * 100.0).round() as u64;
    let (whole, centis) = if centis == 100 {
        (whole + 1, 0)
    } else {
        (whole, centis)
    };
    format!(
        "{:02}:{:02}:{:02}.{:02}",
        whole / 3600,
        (whole / 60) % 60,
        whole % 60,
        centis
    )
}
