//! ffmpeg filter graph and argument construction for vertical renders.

use crate::VerticalRequest;

/// Greedy word wrap. Words longer than `width` get a line of their own.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Escape text for a single-quoted `drawtext=text='...'` value.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\\\\\"),
            '\'' => out.push('\u{2019}'),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            _ => out.push(c),
        }
    }
    out
}

fn secs(value: f64) -> String {
    format!("{}", (value * 1000.0).round() / 1000.0)
}

/// Inputs beyond the source, in `-i` order.
fn extra_inputs(req: &VerticalRequest) -> Vec<&std::path::Path> {
    let mut inputs = Vec::new();
    if let Some(banner) = &req.banner {
        inputs.push(banner.as_path());
    }
    if let (true, Some(image)) = (req.cta.enabled, &req.cta_image) {
        inputs.push(image.as_path());
    }
    inputs
}

/// The `-filter_complex` graph. The final video pad is `[vout]`.
pub fn build_filter_complex(req: &VerticalRequest) -> String {
    let v = &req.video;
    let (w, h) = (v.width, v.height);
    let mut chains = Vec::new();

    // Source, optionally cropped, split into blurred fill and centred foreground.
    let crop = if v.crop_top_px > 0 {
        format!("crop=iw:ih-{top}:0:{top},", top = v.crop_top_px)
    } else {
        String::new()
    };
    chains.push(format!("[0:v]{crop}split=2[bgsrc][fgsrc]"));
    chains.push(format!(
        "[bgsrc]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},boxblur={}:1[bg]",
        v.bg_blur
    ));
    chains.push(format!(
        "[fgsrc]scale={w}:{h}:force_original_aspect_ratio=decrease[fg]"
    ));
    chains.push("[bg][fg]overlay=(W-w)/2:(H-h)/2[base]".to_string());

    let hook_window = format!("between(t,0,{})", secs(req.hook.duration_seconds));
    let mut next_input = 1;

    // Hook: banner image, or wrapped text lines.
    if req.banner.is_some() {
        chains.push(format!(
            "[{next_input}:v]scale={}:-1[banner]",
            w * 9 / 10
        ));
        chains.push(format!(
            "[base][banner]overlay=(W-w)/2:{}:enable='{hook_window}'[hooked]",
            req.hook.position_y
        ));
        next_input += 1;
    } else {
        let hook = &req.hook;
        let line_height = hook.font_size * 5 / 4;
        let shadow = if hook.shadow {
            ":shadowcolor=black:shadowx=3:shadowy=3"
        } else {
            ""
        };
        let draws: Vec<String> = wrap_text(&req.hook_text, hook.wrap_width)
            .iter()
            .enumerate()
            .map(|(i, line)| {
                format!(
                    "drawtext=text='{}':fontsize={}:fontcolor={}:box=1:boxcolor={}@{}:boxborderw=20:x=(w-text_w)/2:y={}{shadow}:enable='{hook_window}'",
                    escape_drawtext(line),
                    hook.font_size,
                    hook.font_color,
                    hook.bg_color,
                    hook.bg_opacity,
                    hook.position_y + i as u32 * line_height,
                )
            })
            .collect();
        if draws.is_empty() {
            chains.push("[base]null[hooked]".to_string());
        } else {
            chains.push(format!("[base]{}[hooked]", draws.join(",")));
        }
    }

    // Call to action over the last seconds.
    let cta = &req.cta;
    let mut last = "hooked".to_string();
    if cta.enabled {
        let start = (req.duration - cta.start_at_seconds_before_end).max(0.0);
        let cta_window = format!("gte(t,{})", secs(start));

        if req.cta_image.is_some() {
            chains.push(format!("[{next_input}:v]scale={}:-1[ctaimg]", w * 6 / 10));
            chains.push(format!(
                "[{last}][ctaimg]overlay=(W-w)/2:{}:enable='{cta_window}'[cta1]",
                cta.position_y
            ));
            last = "cta1".to_string();
        }
        if cta.show_text && !cta.text.trim().is_empty() {
            let text_y = if req.cta_image.is_some() {
                cta.position_y + cta.font_size * 4
            } else {
                cta.position_y
            };
            chains.push(format!(
                "[{last}]drawtext=text='{}':fontsize={}:fontcolor={}:x=(w-text_w)/2:y={text_y}:shadowcolor=black:shadowx=2:shadowy=2:enable='{cta_window}'[cta2]",
                escape_drawtext(&cta.text),
                cta.font_size,
                cta.font_color,
            ));
            last = "cta2".to_string();
        }
    }

    chains.push(format!("[{last}]format=yuv420p[vout]"));
    chains.join(";")
}

/// Full ffmpeg argument list for a vertical render.
pub fn vertical_args(req: &VerticalRequest) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into()];

    if req.loop_source {
        args.extend(["-stream_loop".into(), "-1".into()]);
    }
    args.extend(["-i".into(), req.source.display().to_string()]);

    for image in extra_inputs(req) {
        args.extend([
            "-loop".into(),
            "1".into(),
            "-i".into(),
            image.display().to_string(),
        ]);
    }

    args.extend([
        "-filter_complex".into(),
        build_filter_complex(req),
        "-map".into(),
        "[vout]".into(),
        "-map".into(),
        "0:a?".into(),
        "-t".into(),
        secs(req.duration),
        "-r".into(),
        req.video.fps.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-crf".into(),
        "23".into(),
        "-b:v".into(),
        req.video.bitrate.clone(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-movflags".into(),
        "+faststart".into(),
        req.output.display().to_string(),
    ]);

    args
}
