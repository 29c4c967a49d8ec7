//! HELO capability assembly (spec.md §12): base + fixed + variable
//! capability strings, concatenated in that order onto the HELO frame.

const BASE_CAP: &str =
    "Model=squeezelite,ModelName=SqueezeLite,AccuratePlayPoints=0,HasDigitalOut=1";

/// Builds the fixed capability string from config, computed once at
/// startup: `,MaxSampleRate=<n>,<codecs>`.
pub fn fixed_capability(max_sample_rate: u32, codecs: &[String]) -> String {
    format!(",MaxSampleRate={},{}", max_sample_rate, codecs.join(","))
}

/// Builds the `,SyncgroupID=<id>` suffix from a `serv` sync payload
/// (spec.md §4.4), or an empty string when no sync group was named.
pub fn sync_group_capability(sync_group_id: Option<&[u8; 10]>) -> String {
    match sync_group_id {
        Some(id) => format!(",SyncgroupID={}", String::from_utf8_lossy(id)),
        None => String::new(),
    }
}

/// Concatenates base + fixed + variable capability strings in the order
/// the HELO frame expects them (spec.md §4.1, §12).
pub fn full_capability_blob(fixed_cap: &str, var_cap: &str) -> String {
    format!("{}{}{}", BASE_CAP, fixed_cap, var_cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_capability_lists_codecs_after_sample_rate() {
        let cap = fixed_capability(192000, &["pcm".into(), "flc".into(), "mp3".into()]);
        assert_eq!(cap, ",MaxSampleRate=192000,pcm,flc,mp3");
    }

    #[test]
    fn sync_group_capability_formats_ten_byte_payload() {
        let id = *b"ABCDEFGHIJ";
        assert_eq!(sync_group_capability(Some(&id)), ",SyncgroupID=ABCDEFGHIJ");
        assert_eq!(sync_group_capability(None), "");
    }

    #[test]
    fn full_blob_concatenates_base_fixed_var_in_order() {
        let blob = full_capability_blob(",MaxSampleRate=48000,pcm", ",SyncgroupID=ABCDEFGHIJ");
        assert!(blob.starts_with(BASE_CAP));
        assert!(blob.ends_with(",SyncgroupID=ABCDEFGHIJ"));
        assert!(blob.contains(",MaxSampleRate=48000,pcm"));
    }
}
