//! Randomized algebraic laws over small variable universes.
//!
//! Families are generated from a seeded RNG so failures reproduce. Every
//! intermediate result is protected while later operations may allocate,
//! and each round releases its references so the collector gets exercised
//! across rounds.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use zbdd_rs::cache::HashMapCache;
use zbdd_rs::types::{NodeId, Var};
use zbdd_rs::zbdd::Zbdd;

const ROUNDS: usize = 60;
const UNIVERSE: usize = 6;

/// Protects a node for the rest of the round.
fn guard(zbdd: &mut Zbdd, node: NodeId, pool: &mut Vec<NodeId>) -> NodeId {
    zbdd.inc_ref(node).unwrap();
    pool.push(node);
    node
}

fn random_family(zbdd: &mut Zbdd, vars: &[Var], rng: &mut ChaCha8Rng) -> NodeId {
    let mut family = if rng.gen_bool(0.25) { NodeId::BASE } else { NodeId::EMPTY };
    let cubes = rng.gen_range(0..=4);
    for _ in 0..cubes {
        let cube_vars: Vec<Var> = vars.iter().copied().filter(|_| rng.gen_bool(0.5)).collect();
        zbdd.inc_ref(family).unwrap();
        let cube = zbdd.cube(cube_vars).unwrap();
        let next = zbdd.union(family, cube).unwrap();
        zbdd.dec_ref(family).unwrap();
        family = next;
    }
    family
}

type BinOp = fn(&mut Zbdd, NodeId, NodeId) -> zbdd_rs::error::Result<NodeId>;

fn check_laws(mut zbdd: Zbdd, seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let vars: Vec<Var> = (0..UNIVERSE).map(|_| zbdd.create_var().unwrap()).collect();
    let associative_ops: [BinOp; 3] = [Zbdd::union, Zbdd::intersect, Zbdd::multiply];

    for _ in 0..ROUNDS {
        let mut pool = Vec::new();

        let p = random_family(&mut zbdd, &vars, &mut rng);
        let p = guard(&mut zbdd, p, &mut pool);
        let q = random_family(&mut zbdd, &vars, &mut rng);
        let q = guard(&mut zbdd, q, &mut pool);
        let r = random_family(&mut zbdd, &vars, &mut rng);
        let r = guard(&mut zbdd, r, &mut pool);

        // commutativity
        let pq = zbdd.union(p, q).unwrap();
        let pq = guard(&mut zbdd, pq, &mut pool);
        let qp = zbdd.union(q, p).unwrap();
        let qp = guard(&mut zbdd, qp, &mut pool);
        assert_eq!(pq, qp);

        let pi = zbdd.intersect(p, q).unwrap();
        let pi = guard(&mut zbdd, pi, &mut pool);
        let qi = zbdd.intersect(q, p).unwrap();
        let qi = guard(&mut zbdd, qi, &mut pool);
        assert_eq!(pi, qi);

        let pm = zbdd.multiply(p, q).unwrap();
        let pm = guard(&mut zbdd, pm, &mut pool);
        let qm = zbdd.multiply(q, p).unwrap();
        let qm = guard(&mut zbdd, qm, &mut pool);
        assert_eq!(pm, qm);

        // associativity
        for op in associative_ops {
            let ab = op(&mut zbdd, p, q).unwrap();
            let ab = guard(&mut zbdd, ab, &mut pool);
            let ab_c = op(&mut zbdd, ab, r).unwrap();
            let ab_c = guard(&mut zbdd, ab_c, &mut pool);
            let bc = op(&mut zbdd, q, r).unwrap();
            let bc = guard(&mut zbdd, bc, &mut pool);
            let a_bc = op(&mut zbdd, p, bc).unwrap();
            let a_bc = guard(&mut zbdd, a_bc, &mut pool);
            assert_eq!(ab_c, a_bc);
        }

        // absorption: p ∪ (p ∩ q) = p
        let absorbed = zbdd.union(p, pi).unwrap();
        assert_eq!(absorbed, p);

        // difference laws
        assert_eq!(zbdd.difference(p, p).unwrap(), NodeId::EMPTY);
        assert_eq!(zbdd.difference(p, NodeId::EMPTY).unwrap(), p);
        assert_eq!(zbdd.difference(NodeId::EMPTY, p).unwrap(), NodeId::EMPTY);

        // inclusion-exclusion on cardinalities
        let count_union = zbdd.count(pq).unwrap();
        let count_intersect = zbdd.count(pi).unwrap();
        assert_eq!(
            count_union + count_intersect,
            zbdd.count(p).unwrap() + zbdd.count(q).unwrap()
        );

        // division round-trip: q * (p/q) ∪ (p%q) = p
        if q != NodeId::EMPTY {
            let quotient = zbdd.divide(p, q).unwrap();
            let quotient = guard(&mut zbdd, quotient, &mut pool);
            let product = zbdd.multiply(q, quotient).unwrap();
            let product = guard(&mut zbdd, product, &mut pool);
            let remainder = zbdd.modulo(p, q).unwrap();
            let remainder = guard(&mut zbdd, remainder, &mut pool);
            let rebuilt = zbdd.union(product, remainder).unwrap();
            assert_eq!(rebuilt, p);
        }

        // contains(p, q) ⇔ union(p, q) = p, for non-empty operands
        if p != NodeId::EMPTY && q != NodeId::EMPTY {
            assert_eq!(zbdd.contains(p, q).unwrap(), pq == p);
        }

        // atomize: idempotent, and counts the distinct variables of p
        let atoms = zbdd.atomize(p).unwrap();
        let atoms = guard(&mut zbdd, atoms, &mut pool);
        let atoms_again = zbdd.atomize(atoms).unwrap();
        assert_eq!(atoms_again, atoms);
        let distinct = vars
            .iter()
            .filter(|&&var| zbdd.has_cube_with_var(p, var).unwrap())
            .count() as u64;
        assert_eq!(zbdd.count(atoms).unwrap(), distinct);

        for node in pool {
            zbdd.dec_ref(node).unwrap();
        }
    }

    // everything released: a final collection leaves only the terminals
    zbdd.gc();
    assert_eq!(zbdd.statistics().occupied_nodes(), 2);
}

#[test]
fn laws_plain_engine() {
    check_laws(Zbdd::new(), 0x5eed);
}

#[test]
fn laws_cached_engine() {
    let mut zbdd = Zbdd::new();
    zbdd.set_cache(Box::new(HashMapCache::new()));
    check_laws(zbdd, 0x5eed);
}

#[test]
fn laws_other_seed() {
    check_laws(Zbdd::new(), 2026);
}
