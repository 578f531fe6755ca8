mod markdown;

pub(crate) use markdown::{
    FenceState, ParsedRaw, RawForm, inline_code_spans, parse_note, parse_raw_target, parse_snippet,
};
