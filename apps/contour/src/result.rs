//! 运行结果的文本报告.

use crate::profile::Profile;
use ct_contour::train::{Evaluation, TrainingReport};
use std::io::{self, Write};

const S4: &str = "    ";

#[inline]
fn f64_to_display(f: Option<f64>) -> String {
    match f {
        Some(f) => format!("{f:.6}"),
        None => "/".to_string(),
    }
}

/// 将 `profile` 的结果写进 `w` 中.
pub fn describe_into<W: Write>(name: &str, p: &Profile, w: &mut W) -> io::Result<()> {
    writeln!(w, "Profile `{name}`:")?;
    for (stage, d) in p.stages() {
        writeln!(w, "{S4}Stage `{stage}`: {} us", d.as_micros())?;
    }
    writeln!(w, "{S4}Slices: {}", p.get_slices())?;
    writeln!(w, "{S4}Total machine time: {} us", p.get_real_time_us())?;
    writeln!(
        w,
        "{S4}Average time: {} us per slice",
        f64_to_display(p.get_avg_slice_time_us())
    )?;
    match p.get_most_time_consuming() {
        Some((stage, d)) => write!(w, "{S4}Most time-consuming stage `{stage}` costs {} us", d.as_micros()),
        None => write!(w, "{S4}Most time-consuming stage: /"),
    }
}

/// 将训练过程写进 `w` 中.
pub fn describe_training<W: Write>(report: &TrainingReport, w: &mut W) -> io::Result<()> {
    writeln!(w, "epoch  train_loss  val_loss  dice      iou       lr")?;
    for e in report.epochs.iter() {
        let mark = if report.best_epoch == Some(e.epoch) { " *" } else { "" };
        writeln!(
            w,
            "{:<5}  {:.6}    {:.6}  {:.6}  {:.6}  {:.2e}{mark}",
            e.epoch, e.train_loss, e.val_loss, e.dice, e.iou, e.lr
        )?;
    }
    match report.best_epoch {
        Some(b) => write!(w, "Best epoch: {b}"),
        None => write!(w, "Best epoch: /"),
    }
}

/// 将测试结果写进 `w` 中.
pub fn describe_evaluation<W: Write>(e: &Evaluation, w: &mut W) -> io::Result<()> {
    writeln!(w, "Evaluation:")?;
    writeln!(w, "{S4}Slices: {}", e.samples)?;
    writeln!(w, "{S4}Loss: {:.6}", e.loss)?;
    writeln!(w, "{S4}Dice: {:.6}", e.dice())?;
    write!(w, "{S4}IoU: {:.6}", e.iou())
}

/// 打印 `describe` 写出的内容, 前后加分隔线.
pub fn print_with<F>(describe: F) -> io::Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
{
    let mut buf = Vec::with_capacity(512);
    describe(&mut buf)?;
    let mut out = io::stdout().lock();
    utils::sep_to(&mut out)?;
    out.write_all(&buf)?;
    writeln!(out)?;
    utils::sep_to(&mut out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ct_contour::train::{EpochSummary, OverlapCounts};

    #[test]
    fn test_describe_training_marks_best() {
        let summary = |epoch, val_loss| EpochSummary {
            epoch,
            train_loss: 0.5,
            val_loss,
            dice: 0.8,
            iou: 0.7,
            lr: 1e-3,
        };
        let report = TrainingReport {
            epochs: vec![summary(1, 0.4), summary(2, 0.3)],
            best_epoch: Some(2),
        };
        let mut buf = Vec::new();
        describe_training(&report, &mut buf).unwrap();
        let s = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = s.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(!lines[1].ends_with('*'));
        assert!(lines[2].ends_with('*'));
        assert_eq!(lines[3], "Best epoch: 2");
    }

    #[test]
    fn test_describe_evaluation() {
        let e = Evaluation {
            loss: 0.25,
            counts: OverlapCounts {
                true_positive: 3.0,
                false_positive: 1.0,
                false_negative: 0.0,
            },
            samples: 2,
        };
        let mut buf = Vec::new();
        describe_evaluation(&e, &mut buf).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("Slices: 2"));
        assert!(s.contains("Dice: 0.857143"));
        assert!(s.contains("IoU: 0.750000"));
    }

    #[test]
    fn test_describe_profile() {
        let mut p = Profile::new();
        p.stage("load", || ());
        let mut buf = Vec::new();
        describe_into("infer", &p.finish(), &mut buf).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.starts_with("Profile `infer`:"));
        assert!(s.contains("Stage `load`"));
    }
}
