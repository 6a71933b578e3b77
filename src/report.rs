//! Static HTML table of per-class probabilities, one row per test image.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::info;

use crate::error::{Error, Result};
use crate::eval::Prediction;

const STYLE: &str = "table, th, td {\nborder: 1px solid black;\nborder-collapse: collapse;\n}\n";

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `image_prefix` is joined with `image{index}.png` to reference the extracted test images.
pub fn render_html(
    predictions: &[Prediction],
    class_names: &[&str],
    image_prefix: &str,
) -> Result<String> {
    let mut html = String::new();
    let fmt_err = |_| Error::InvalidArgument("failed to format report".into());

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<style>\n");
    html.push_str(STYLE);
    html.push_str("</style>\n</head>\n\n<body>\n<table style=\"width:100%\">\n<tr>\n");
    html.push_str("<th>Image</th>\n");
    for name in class_names {
        writeln!(html, "<th>{}</th>", escape(&capitalize(name))).map_err(fmt_err)?;
    }
    html.push_str("</tr>\n");

    for p in predictions {
        if p.probabilities.len() != class_names.len() {
            return Err(Error::InvalidArgument(format!(
                "prediction {} has {} probabilities for {} classes",
                p.index,
                p.probabilities.len(),
                class_names.len()
            )));
        }
        let label = usize::try_from(p.label)
            .ok()
            .and_then(|l| class_names.get(l))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "prediction {} has label {} outside the class list",
                    p.index, p.label
                ))
            })?;

        write!(
            html,
            "  <tr>\n    <td align=\"center\"><img src=\"{}image{}.png\" alt=\"\" border=\"1\" /> {} </td>\n",
            escape(image_prefix),
            p.index,
            escape(label)
        )
        .map_err(fmt_err)?;
        for prob in &p.probabilities {
            writeln!(html, "    <td align=\"center\">{prob:.3}</td>").map_err(fmt_err)?;
        }
        html.push_str("  </tr>\n");
    }

    html.push_str("</table>\n</body>\n</html>\n");
    Ok(html)
}

pub fn write_report(
    path: &Path,
    predictions: &[Prediction],
    class_names: &[&str],
    image_prefix: &str,
) -> Result<()> {
    let html = render_html(predictions, class_names, image_prefix)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, html)?;
    info!(
        "wrote report with {} rows to {}",
        predictions.len(),
        path.display()
    );
    Ok(())
}
