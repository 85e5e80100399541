use crate::debug::format_polar_vec;
use crate::math::{injection_current, with_magnitude};
use crate::topology::Topology;
use num_complex::Complex64;
use num_traits::Zero;

pub trait ProgressMonitor {
    fn update(&self, i: usize, max_dv: f64);
}

/// Reports sweep progress through the `log` facade.
pub struct LogProgress {}

impl ProgressMonitor for LogProgress {
    fn update(&self, i: usize, max_dv: f64) {
        log::trace!("sweep {:3}  max |dV|/|Vslack| = {:10.3e}", i, max_dv);
    }
}

/// A single-phase equivalent radial network ready to be swept.
pub struct SweepCase<'a> {
    pub topo: &'a Topology,

    /// Impedance of the cable feeding each node (ohm).
    pub z_branch: &'a [Complex64],

    /// Constant power drawn by each node (VA).
    pub s_node: &'a [Complex64],

    /// Slack voltage behind the source impedance (V).
    pub v_slack: Complex64,

    /// Source (transformer) impedance (ohm).
    pub z_source: Complex64,

    /// Pinned voltage magnitude of each node (V). The angle follows the
    /// upstream network.
    pub pinned: &'a [Option<f64>],
}

/// Sweep solution of one single-phase equivalent network.
#[derive(Debug, Clone)]
pub struct SweepSolution {
    /// Node voltages (V).
    pub v: Vec<Complex64>,

    /// Node voltages before pinning (V). Equal to `v` on unpinned nodes.
    pub v_upstream: Vec<Complex64>,

    /// Current in the cable feeding each node, flowing away from the source
    /// (A). At the source it is the total current leaving the bus.
    pub i_branch: Vec<Complex64>,

    /// Voltage of the source bus after the transformer drop (V).
    pub v_bus: Complex64,

    pub converged: bool,
    pub iterations: usize,

    /// Final largest voltage change relative to the slack magnitude.
    pub max_dv: f64,
}

/// Solves a radial network by backward/forward sweep.
///
/// Starts flat at the slack voltage. Each iteration computes node injection
/// currents from the previous voltages, accumulates branch currents from the
/// leaves to the source (backward), then propagates voltage drops from the
/// source bus to the leaves (forward). Stops when the largest voltage change
/// relative to the slack magnitude falls below `tol`, or after `max_it`
/// iterations, in which case the last iterate is returned unconverged.
pub fn radial_pf(
    case: &SweepCase,
    tol: f64,
    max_it: usize,
    progress: Option<&dyn ProgressMonitor>,
) -> SweepSolution {
    let topo = case.topo;
    let nb = topo.node_count();
    let post = topo.post_order();
    let v_ref = case.v_slack.norm().max(f64::MIN_POSITIVE);

    let mut v = vec![Complex64::zero(); nb];
    for &u in &topo.order {
        v[u] = case.v_slack;
    }
    let mut v_upstream = v.clone();
    let mut i_branch = vec![Complex64::zero(); nb];
    let mut v_bus = case.v_slack;

    let mut converged = false;
    let mut i = 0;
    let mut max_dv = f64::INFINITY;

    while !converged && i < max_it {
        i += 1;

        // backward sweep
        for &u in &post {
            let mut acc = injection_current(case.s_node[u], v[u]);
            for &c in &topo.children[u] {
                acc += i_branch[c];
            }
            i_branch[u] = acc;
        }

        // forward sweep
        let mut v_new = vec![Complex64::zero(); nb];
        v_bus = case.v_slack - case.z_source * i_branch[topo.source];
        v_new[topo.source] = v_bus;
        v_upstream[topo.source] = v_bus;
        for &u in topo.order.iter().skip(1) {
            let Some(p) = topo.parent[u] else {
                continue;
            };
            let vu = v_new[p] - case.z_branch[u] * i_branch[u];
            v_upstream[u] = vu;
            v_new[u] = match case.pinned[u] {
                Some(mag) => with_magnitude(mag, vu),
                None => vu,
            };
        }

        max_dv = topo
            .order
            .iter()
            .map(|&u| (v_new[u] - v[u]).norm() / v_ref)
            .fold(0.0, f64::max);
        v = v_new;

        if let Some(pm) = progress {
            pm.update(i, max_dv);
        }
        if max_dv < tol {
            converged = true;
            log::debug!("backward/forward sweep converged in {} iterations", i);
        }
    }

    if !converged {
        log::warn!(
            "backward/forward sweep did not converge in {} iterations (max dV = {:.3e})",
            i,
            max_dv
        );
    }
    log::trace!("V: {}", format_polar_vec(&v));

    SweepSolution {
        v,
        v_upstream,
        i_branch,
        v_bus,
        converged,
        iterations: i,
        max_dv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;
    use crate::network::{Cable, ConnectionType, Node};
    use approx::assert_abs_diff_eq;

    fn chain(n: usize) -> Topology {
        let mut nodes = vec![Node::source("n0", ConnectionType::Tetra400)];
        let mut cables = Vec::new();
        for k in 1..n {
            nodes.push(Node::new(&format!("n{}", k), ConnectionType::Tetra400));
            cables.push(Cable::new(
                &format!("c{}", k),
                &format!("n{}", k - 1),
                &format!("n{}", k),
                "t",
            ));
        }
        Topology::build(&nodes, &cables).unwrap()
    }

    #[test]
    fn test_no_load_is_flat() {
        let topo = chain(4);
        let z = vec![cmplx!(0.1, 0.05); 4];
        let s = vec![cmplx!(); 4];
        let pinned = vec![None; 4];
        let case = SweepCase {
            topo: &topo,
            z_branch: &z,
            s_node: &s,
            v_slack: cmplx!(230.0),
            z_source: cmplx!(0.01, 0.03),
            pinned: &pinned,
        };
        let sol = radial_pf(&case, 1e-4, 100, None);
        assert!(sol.converged);
        assert_eq!(sol.iterations, 1);
        for v in &sol.v {
            assert_abs_diff_eq!(v.re, 230.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_single_branch_power_balance() {
        let topo = chain(2);
        let z = vec![cmplx!(), cmplx!(0.2, 0.1)];
        let s = vec![cmplx!(), cmplx!(3000.0, 1000.0)];
        let pinned = vec![None; 2];
        let case = SweepCase {
            topo: &topo,
            z_branch: &z,
            s_node: &s,
            v_slack: cmplx!(230.0),
            z_source: cmplx!(),
            pinned: &pinned,
        };
        let sol = radial_pf(&case, 1e-10, 100, Some(&LogProgress {}));
        assert!(sol.converged);

        // power at the load matches the demand
        let s_load = sol.v[1] * sol.i_branch[1].conj();
        assert_abs_diff_eq!(s_load.re, 3000.0, epsilon = 1e-3);
        assert_abs_diff_eq!(s_load.im, 1000.0, epsilon = 1e-3);

        // sending end power = load + I^2 Z
        let s_send = sol.v[0] * sol.i_branch[1].conj();
        let loss = z[1] * sol.i_branch[1].norm_sqr();
        assert_abs_diff_eq!((s_send - s_load - loss).norm(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_pinned_node() {
        let topo = chain(3);
        let z = vec![cmplx!(), cmplx!(0.3), cmplx!(0.1)];
        let s = vec![cmplx!(), cmplx!(5000.0), cmplx!(2000.0)];
        let pinned = vec![None, Some(235.0), None];
        let case = SweepCase {
            topo: &topo,
            z_branch: &z,
            s_node: &s,
            v_slack: cmplx!(230.0),
            z_source: cmplx!(),
            pinned: &pinned,
        };
        let sol = radial_pf(&case, 1e-8, 100, None);
        assert!(sol.converged);
        assert_abs_diff_eq!(sol.v[1].norm(), 235.0, epsilon = 1e-9);
        assert!(sol.v_upstream[1].norm() < 230.0);
        assert!(sol.v[2].norm() < 235.0);
    }

    #[test]
    fn test_iteration_cap() {
        let topo = chain(2);
        let z = vec![cmplx!(), cmplx!(0.5, 0.2)];
        let s = vec![cmplx!(), cmplx!(20_000.0, 5_000.0)];
        let pinned = vec![None; 2];
        let case = SweepCase {
            topo: &topo,
            z_branch: &z,
            s_node: &s,
            v_slack: cmplx!(230.0),
            z_source: cmplx!(),
            pinned: &pinned,
        };
        let sol = radial_pf(&case, 1e-12, 1, None);
        assert!(!sol.converged);
        assert_eq!(sol.iterations, 1);
        assert!(sol.v[1].norm().is_finite());
    }
}
