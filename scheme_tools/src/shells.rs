//! Groups measurements into shells by b-value proximity. Shell 0 is reserved
//! for unweighted (b0) measurements; DWI shells are numbered 1..=K in
//! ascending b-value order. Clustering is a single threshold scan over the
//! sorted b-values, so the result does not depend on input order.

/// new shell once a value sits more than this far above the running shell mean
pub const DEFAULT_SHELL_DISTANCE:f64 = 50.0E6;  // s/m^2 (50 s/mm^2)
/// measurements at or below this b-value count as b0
pub const DEFAULT_B0_THRESHOLD:f64 = 10.0E6;    // s/m^2 (10 s/mm^2)

#[derive(Debug,Clone,PartialEq)]
pub struct ShellClassification {
    shell_indices:Vec<usize>,
    shell_bvalues:Vec<f64>,
}

impl ShellClassification {

    /// Per-measurement shell index, input order.
    pub fn shell_indices(&self) -> &[usize] {
        &self.shell_indices
    }

    /// Mean b-value of each DWI shell, ascending. `shell_bvalues()[k-1]`
    /// belongs to shell k.
    pub fn shell_bvalues(&self) -> &[f64] {
        &self.shell_bvalues
    }

    /// Number of DWI shells (the b0 shell is not counted).
    pub fn n_shells(&self) -> usize {
        self.shell_bvalues.len()
    }

    pub fn n_b0(&self) -> usize {
        self.shell_indices.iter().filter(|&&s| s == 0).count()
    }

    pub fn shell_members(&self,shell:usize) -> Vec<usize> {
        (0..self.shell_indices.len()).filter(|&i| self.shell_indices[i] == shell).collect()
    }
}

pub fn classify_shells(bvalues:&[f64],shell_distance:f64,b0_threshold:f64) -> ShellClassification {
    let mut shell_indices = vec![0usize;bvalues.len()];

    // sort DWI indices ascending by b-value, then scan once: a measurement
    // further than shell_distance above the running shell mean opens the
    // next shell
    let mut order:Vec<usize> = (0..bvalues.len()).filter(|&i| bvalues[i] > b0_threshold).collect();
    order.sort_by(|&a,&b| bvalues[a].total_cmp(&bvalues[b]));

    let mut shell_bvalues = Vec::<f64>::new();
    let mut members = Vec::<usize>::new();
    let mut running_sum = 0.0;

    let close_shell = |members:&mut Vec<usize>,running_sum:&mut f64,
                           shell_bvalues:&mut Vec<f64>,shell_indices:&mut Vec<usize>| {
        let mean = *running_sum/members.len() as f64;
        shell_bvalues.push(mean);
        for &m in members.iter() {
            shell_indices[m] = shell_bvalues.len();
        }
        members.clear();
        *running_sum = 0.0;
    };

    for &i in &order {
        if !members.is_empty() {
            let mean = running_sum/members.len() as f64;
            if bvalues[i] - mean > shell_distance {
                close_shell(&mut members,&mut running_sum,&mut shell_bvalues,&mut shell_indices);
            }
        }
        members.push(i);
        running_sum += bvalues[i];
    }
    if !members.is_empty() {
        close_shell(&mut members,&mut running_sum,&mut shell_bvalues,&mut shell_indices);
    }

    ShellClassification {
        shell_indices,
        shell_bvalues,
    }
}
