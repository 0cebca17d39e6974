use gateway_core::types::Channel;

/// Largest byte index `<= index` that lands on a UTF-8 char boundary of `s`.
/// `str::floor_char_boundary` is nightly-only, so this hand-rolls the same
/// walk-back used by the hard-split fallback to avoid slicing mid-codepoint.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Per-channel character limit for one outbound message (spec §4.7).
pub fn chunk_limit(channel: Channel) -> usize {
    match channel {
        Channel::WhatsApp => 4096,
        Channel::Telegram => 4096,
        Channel::Discord => 2000,
        Channel::Teams => 28_000,
        Channel::Zalo => 2000,
        Channel::Nostr => 4096,
        Channel::Twitch => 500,
        Channel::DingTalk => 4096,
        Channel::Web => 4096,
    }
}

/// Markdown-aware, fence-preserving splitter. Never breaks inside a fenced
/// code block: when a split would fall inside one, the fence is closed
/// before the boundary and re-opened (with the same language tag) at the
/// start of the next chunk. Falls back to a hard split on any line still
/// longer than `limit` after line-level splitting.
pub fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fence_lang: Option<String> = None;

    for line in &lines {
        let cost = if current.is_empty() { line.len() } else { 1 + line.len() };

        if !current.is_empty() && current.len() + cost > limit {
            if fence_lang.is_some() {
                current.push_str("\n```");
            }
            chunks.push(current);
            current = String::new();
            if let Some(ref lang) = fence_lang {
                if lang.is_empty() {
                    current.push_str("```\n");
                } else {
                    current.push_str("```");
                    current.push_str(lang);
                    current.push('\n');
                }
            }
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let trimmed = line.trim_start();
        if let Some(after_fence) = trimmed.strip_prefix("```") {
            if fence_lang.is_some() {
                fence_lang = None;
            } else {
                fence_lang = Some(after_fence.trim().to_string());
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    let mut result = Vec::new();
    for chunk in chunks {
        if chunk.len() <= limit {
            result.push(chunk);
        } else {
            let mut remaining = chunk.as_str();
            while remaining.len() > limit {
                let boundary = floor_char_boundary(remaining, limit);
                let head = &remaining[..boundary];
                let split_at = head
                    .rfind("\n\n")
                    .map(|i| i + 2)
                    .or_else(|| head.rfind('\n'))
                    .or_else(|| head.rfind(". ").map(|i| i + 2))
                    .or_else(|| head.rfind(' '))
                    .unwrap_or(boundary);
                result.push(remaining[..split_at].to_string());
                remaining = remaining[split_at..].trim_start();
            }
            if !remaining.is_empty() {
                result.push(remaining.to_string());
            }
        }
    }

    result
}
