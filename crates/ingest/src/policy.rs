use flowidx_primitives::{script_hash, BlockBundle};
use flowidx_store::ScriptRow;

/// Applies the inline-script policy to a fetched bundle.
///
/// Scripts at or below `inline_max_bytes` (when non-zero) stay on the
/// transaction row; everything else is replaced by its SHA-256 and returned
/// as content-addressed rows for `raw.scripts`. Either way the hash column
/// is filled, so lookups never depend on where the text lives.
pub fn prepare_bundle(bundle: &mut BlockBundle, inline_max_bytes: usize) -> Vec<ScriptRow> {
    let mut scripts = Vec::new();
    for tx in &mut bundle.transactions {
        let Some(script) = tx.transaction.script.take() else { continue };
        let hash = script_hash(&script);
        tx.transaction.script_hash = Some(hash);
        if inline_max_bytes > 0 && script.len() <= inline_max_bytes {
            tx.transaction.script = Some(script);
        } else if !scripts.iter().any(|row: &ScriptRow| row.hash == hash) {
            scripts.push(ScriptRow { hash, text: script });
        }
    }
    scripts
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::mock::fixtures;

    fn bundle_with_scripts(count: usize) -> BlockBundle {
        let txs = (0..count)
            .map(|i| {
                fixtures::tx_bundle(
                    fixtures::transaction(10, i as u32, fixtures::address(1)),
                    Vec::new(),
                )
            })
            .collect();
        fixtures::bundle_with(10, 0, txs)
    }

    #[test]
    fn identical_scripts_offload_once() {
        let mut bundle = bundle_with_scripts(1_000);
        let scripts = prepare_bundle(&mut bundle, 0);
        assert_eq!(scripts.len(), 1);
        for tx in &bundle.transactions {
            assert!(tx.transaction.script.is_none());
            assert_eq!(tx.transaction.script_hash, Some(scripts[0].hash));
        }
    }

    #[test]
    fn small_scripts_stay_inline_above_zero_threshold() {
        let mut bundle = bundle_with_scripts(3);
        let scripts = prepare_bundle(&mut bundle, 4_096);
        assert!(scripts.is_empty());
        for tx in &bundle.transactions {
            assert!(tx.transaction.script.is_some());
            assert!(tx.transaction.script_hash.is_some());
        }
    }
}
