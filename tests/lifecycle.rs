// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use k3s_deploy_lib::{
        cluster,
        inventory::PowerAction,
        lifecycle::{self, LifecycleAction},
        test_env::*,
        vm::{RoleTags, Vm, VmId, VmStatus},
    };

    fn nodes(inventory: &FakeInventory) -> Vec<Vm> {
        let partition = cluster::discover(inventory, &RoleTags::default()).unwrap();
        inventory.clear_calls();
        partition.all().to_vec()
    }

    #[test]
    fn start_skips_running_vms() {
        let inventory = FakeInventory::new()
            .with_vm("pve1", 100, "k3s-server", VmStatus::Running)
            .with_vm("pve1", 101, "k3s-agent", VmStatus::Stopped);
        let mut vms = nodes(&inventory);

        let report = lifecycle::apply(&inventory, LifecycleAction::Start, &mut vms);
        assert_eq!(report.unchanged, vec![VmId::new("pve1", 100)]);
        assert_eq!(
            inventory.power_actions(),
            vec![(VmId::new("pve1", 101), PowerAction::Start)]
        );
        assert_eq!(vms[0].status, Some(VmStatus::Running));
    }

    #[test]
    fn stop_is_a_graceful_shutdown() {
        let inventory = FakeInventory::new()
            .with_vm("pve1", 100, "k3s-server", VmStatus::Running)
            .with_vm("pve1", 101, "k3s-agent", VmStatus::Stopped);
        let mut vms = nodes(&inventory);

        let report = lifecycle::apply(&inventory, LifecycleAction::Stop, &mut vms);
        assert_eq!(report.issued, vec![(VmId::new("pve1", 100), PowerAction::Stop)]);
        assert_eq!(report.unchanged, vec![VmId::new("pve1", 101)]);
        assert!(inventory
            .calls()
            .iter()
            .any(|call| *call == Call::Power(VmId::new("pve1", 100), PowerAction::Stop)));
        assert_eq!(
            inventory.vm("pve1", 100).map(|vm| vm.status),
            Some(VmStatus::Stopped)
        );
    }

    #[test]
    fn status_failure_skips_only_that_vm() {
        let inventory = FakeInventory::new()
            .with_vm("pve1", 100, "k3s-server", VmStatus::Stopped)
            .with_vm("pve1", 101, "k3s-agent", VmStatus::Stopped)
            .with_vm("pve1", 102, "k3s-agent", VmStatus::Stopped)
            .failing("pve1", 101, Op::Status);
        let mut vms = nodes(&inventory);

        let report = lifecycle::apply(&inventory, LifecycleAction::Start, &mut vms);
        assert_eq!(report.failed, vec![VmId::new("pve1", 101)]);
        assert_eq!(
            inventory.power_actions(),
            vec![
                (VmId::new("pve1", 100), PowerAction::Start),
                (VmId::new("pve1", 102), PowerAction::Start),
            ]
        );
    }

    #[test]
    fn power_failure_does_not_stop_the_batch() {
        let inventory = FakeInventory::new()
            .with_vm("pve1", 100, "k3s-server", VmStatus::Running)
            .with_vm("pve1", 101, "k3s-agent", VmStatus::Running)
            .failing("pve1", 100, Op::Power);
        let mut vms = nodes(&inventory);

        let report = lifecycle::apply(&inventory, LifecycleAction::Restart, &mut vms);
        assert_eq!(report.failed, vec![VmId::new("pve1", 100)]);
        assert_eq!(report.issued, vec![(VmId::new("pve1", 101), PowerAction::Reboot)]);
    }

    #[test]
    fn restart_starts_a_stopped_vm() {
        let inventory =
            FakeInventory::new().with_vm("pve1", 100, "k3s-server", VmStatus::Stopped);
        let mut vms = nodes(&inventory);

        lifecycle::apply(&inventory, LifecycleAction::Restart, &mut vms);
        assert_eq!(
            inventory.power_actions(),
            vec![(VmId::new("pve1", 100), PowerAction::Start)]
        );
    }

    #[test]
    fn empty_node_set_is_a_no_op() {
        let inventory = FakeInventory::new();
        let report = lifecycle::apply(&inventory, LifecycleAction::Start, &mut []);
        assert!(report.issued.is_empty());
        assert!(inventory.calls().is_empty());
    }
}
