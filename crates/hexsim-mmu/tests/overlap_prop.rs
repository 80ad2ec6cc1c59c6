use hexsim_mmu::{Access, Overlap, PageSize, TlbEntry, TlbPerms, TlbStore};
use proptest::prelude::*;

const TLB_LEN: usize = 32;

fn entry_strategy() -> impl Strategy<Value = TlbEntry> {
    (0u32..0x400, 0u8..4, prop::bool::weighted(0.1), 0u8..4, 0u32..0x1000).prop_map(
        |(vpn, asid, global, code, ppn)| TlbEntry {
            valid: true,
            global,
            asid,
            vpn,
            ppn,
            perms: TlbPerms::R | TlbPerms::W,
            size: PageSize::from_code(code).unwrap(),
            ..TlbEntry::default()
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]
    #[test]
    fn overlap_checked_tlb_has_at_most_one_match(
        candidates in prop::collection::vec(entry_strategy(), 1..64),
        queries in prop::collection::vec((0u8..4, 0u32..0x0040_0000), 1..64),
    ) {
        let mut tlb = TlbStore::new(TLB_LEN);
        let mut next = 0;
        for candidate in candidates {
            if next == TLB_LEN {
                break;
            }
            if tlb.check_overlap(&candidate, None) == Overlap::None {
                tlb.write(next, candidate);
                next += 1;
            }
        }

        for (asid, vaddr) in queries {
            let matching: Vec<usize> = tlb
                .entries()
                .iter()
                .enumerate()
                .filter(|(_, e)| e.valid && e.matches_asid(asid) && e.covers(vaddr))
                .map(|(i, _)| i)
                .collect();
            prop_assert!(matching.len() <= 1, "aliasing entries {matching:?}");
            let hit = tlb.find_match(asid, vaddr, Access::read(false));
            prop_assert_eq!(hit.map(|m| m.index), matching.first().copied());
        }
    }

    #[test]
    fn raw_encoding_is_stable(raw in any::<u64>()) {
        let decoded = TlbEntry::from_raw(raw);
        prop_assert_eq!(TlbEntry::from_raw(decoded.to_raw()), decoded);
    }
}
