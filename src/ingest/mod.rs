// src/ingest/mod.rs
pub mod cursor;
pub mod elastic;
pub mod enrich;
pub mod fetcher;
pub mod filter;
pub mod gazetteer;
pub mod harvest;
pub mod providers;
pub mod sink;
pub mod store;
pub mod types;
pub mod watermark;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up in the exposition).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("harvest_pages_total", "Pages fetched from upstream.");
        describe_counter!("harvest_fetched_total", "Raw items returned by upstream.");
        describe_counter!(
            "harvest_filtered_total",
            "Items rejected by dedup/window/keyword/cursor checks."
        );
        describe_counter!("harvest_indexed_total", "Records accepted by the sink.");
        describe_counter!("harvest_failed_total", "Records the sink rejected.");
        describe_counter!(
            "harvest_retries_total",
            "Upstream requests retried after a transient failure."
        );
        describe_histogram!("harvest_fetch_ms", "Upstream page fetch time in milliseconds.");
        describe_gauge!(
            "harvest_last_run_ts",
            "Unix ts when a harvester last finished."
        );
    });
}

/// HTML/markup body → plain text: decode entities, strip tags, fold whitespace.
pub fn clean_content(s: &str) -> String {
    // 1) Block-level tags become spaces so words don't glue together
    static RE_BREAKS: OnceCell<regex::Regex> = OnceCell::new();
    let re_breaks = RE_BREAKS
        .get_or_init(|| regex::Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</li>").unwrap());
    let mut out = re_breaks.replace_all(s, " ").to_string();

    // 2) Strip remaining tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) HTML entity decode (after tag strip, so `&lt;b&gt;` stays literal text)
    out = html_escape::decode_html_entities(&out).to_string();

    // 4) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 5) Collapse whitespace (incl. NBSP)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{00A0}]+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_content_strips_markup() {
        let s = "<p>Vote&nbsp;&nbsp;<b>early</b></p><p>#ausvotes</p>";
        assert_eq!(clean_content(s), "Vote early #ausvotes");
    }

    #[test]
    fn paragraphs_do_not_glue_words() {
        assert_eq!(clean_content("<p>one</p><p>two</p>"), "one two");
        assert_eq!(clean_content("a<br/>b<br>c"), "a b c");
    }
}
