//! Rendering of retrieval responses for people and for tools.

use crate::{
    chunk::Modality,
    chunking::timecode::format_hms,
    error::Result,
    expansion::VideoBundle,
    router::Filters,
    search::{EvidenceItem, RetrievalResponse, Status},
};

/// Citation-annotated plain text.
pub fn render_text(response: &RetrievalResponse) -> String {
    let mut out = String::new();
    if let Some(header) = filter_header(&response.filters) {
        out.push_str(&header);
        out.push_str("\n\n");
    }

    match response.status {
        Status::IndexNotBuilt => {
            out.push_str("Index not built. Run `docsift build` first.\n");
        }
        Status::NoResults => {
            out.push_str(&format!("No results for \"{}\"\n", response.query));
        }
        Status::Ok => {
            for item in &response.items {
                render_item(&mut out, item);
            }
        }
    }
    out
}

/// The serialized response, pretty-printed.
pub fn render_json(response: &RetrievalResponse) -> Result<String> {
    Ok(serde_json::to_string_pretty(response)?)
}

fn filter_header(filters: &Filters) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(file_type) = &filters.file_type {
        parts.push(format!("file_type={file_type}"));
    }
    if let Some(doc_name) = &filters.doc_name {
        parts.push(format!("doc_name={doc_name}"));
    }
    if let Some(ids) = &filters.doc_ids {
        parts.push(format!("doc_ids={}", ids.join(",")));
    }
    (!parts.is_empty()).then(|| format!("Filters: {}", parts.join(" ")))
}

fn context_label(item: &EvidenceItem) -> Option<String> {
    if !item.heading_path.is_empty() {
        return Some(item.heading_path.join(" > "));
    }
    match item.modality {
        Modality::VideoTranscript => Some("video transcript".into()),
        Modality::VideoFrame => Some("video frames".into()),
        Modality::Text
        | Modality::Ocr
        | Modality::AudioTranscript
        | Modality::ImageCaption => None,
    }
}

fn render_item(out: &mut String, item: &EvidenceItem) {
    let header = match context_label(item) {
        Some(label) => format!(
            "[{}] {} \u{2014} {} ({})\n",
            item.rank, item.doc_name, label, item.locator
        ),
        None => format!("[{}] {} ({})\n", item.rank, item.doc_name, item.locator),
    };
    out.push_str(&header);

    match &item.video {
        Some(bundle) => render_bundle(out, bundle),
        None => {
            for line in item.text.lines() {
                if line.is_empty() {
                    out.push_str(">\n");
                } else {
                    out.push_str(&format!("> {line}\n"));
                }
            }
        }
    }
    out.push('\n');
}

fn render_bundle(out: &mut String, bundle: &VideoBundle) {
    for entry in &bundle.entries {
        let text = entry.text.split_whitespace().collect::<Vec<_>>().join(" ");
        out.push_str(&format!(
            "  [{}-{}] ({}) {}\n",
            format_hms(entry.start_ms),
            format_hms(entry.end_ms),
            entry.track.label(),
            text
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk::Locator,
        expansion::{BundleEntry, Track},
        search::Mode,
    };

    fn response(status: Status, items: Vec<EvidenceItem>) -> RetrievalResponse {
        RetrievalResponse {
            query: "budget".into(),
            status,
            mode: Mode::Normal,
            filters: Filters::default(),
            items,
        }
    }

    fn text_item() -> EvidenceItem {
        EvidenceItem {
            rank: 1,
            chunk_id: "c1".into(),
            doc_id: "d1".into(),
            doc_name: "plan.pdf".into(),
            file_type: "pdf".into(),
            modality: Modality::Text,
            locator: Locator::Page { page: 4 },
            heading_path: vec!["Finance".into(), "Budget".into()],
            text: "Total is 40k.\n\nApproved in May.".into(),
            score: 0.03,
            vector_rank: Some(1),
            lexical_rank: None,
            video: None,
        }
    }

    #[test]
    fn text_items_are_quoted_with_citation() {
        let out = render_text(&response(Status::Ok, vec![text_item()]));
        assert_eq!(
            out,
            "[1] plan.pdf \u{2014} Finance > Budget (page 4)\n\
             > Total is 40k.\n\
             >\n\
             > Approved in May.\n\n"
        );
    }

    #[test]
    fn video_items_render_their_bundle() {
        let mut item = text_item();
        item.modality = Modality::VideoTranscript;
        item.heading_path.clear();
        item.locator = Locator::Time {
            start_ms: 60_000,
            end_ms: 70_000,
        };
        item.video = Some(VideoBundle {
            window_start_ms: 45_000,
            window_end_ms: 85_000,
            entries: vec![
                BundleEntry {
                    chunk_id: "f".into(),
                    track: Track::Screen,
                    start_ms: 50_000,
                    end_ms: 50_000,
                    text: "Slide:\n  Q3 numbers".into(),
                },
                BundleEntry {
                    chunk_id: "t".into(),
                    track: Track::Audio,
                    start_ms: 60_000,
                    end_ms: 70_000,
                    text: "so the budget grows".into(),
                },
            ],
        });

        let out = render_text(&response(Status::Ok, vec![item]));
        assert!(out.starts_with(
            "[1] plan.pdf \u{2014} video transcript (00:01:00-00:01:10)\n"
        ));
        assert!(
            out.contains("  [00:00:50-00:00:50] (Screen) Slide: Q3 numbers\n")
        );
        assert!(
            out.contains("  [00:01:00-00:01:10] (Audio) so the budget grows\n")
        );
    }

    #[test]
    fn empty_states_are_explicit() {
        let mut none = response(Status::NoResults, Vec::new());
        none.filters.file_type = Some("mp4".into());
        let out = render_text(&none);
        assert_eq!(
            out,
            "Filters: file_type=mp4\n\nNo results for \"budget\"\n"
        );

        let out = render_text(&response(Status::IndexNotBuilt, Vec::new()));
        assert!(out.starts_with("Index not built"));
    }

    #[test]
    fn json_carries_status_and_items() {
        let json = render_json(&response(Status::Ok, vec![text_item()])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["items"][0]["doc_name"], "plan.pdf");
        assert_eq!(value["items"][0]["locator"]["kind"], "page");
        assert!(value["items"][0].get("lexical_rank").is_none());

        let none = response(Status::NoResults, Vec::new());
        let json = render_json(&none).unwrap();
        assert!(json.contains("\"no_results\""));
    }
}
