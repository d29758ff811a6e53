use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

use crate::common::{conditions::set_condition, HttpRouteView, ParentRef, RouteParentStatus, RouteStatusView, TcpRouteView};

/// Edits the parent statuses a controller owns on a route.
#[derive(Debug, Clone)]
pub struct StatusSetter {
    controller_name: String,
}

impl StatusSetter {
    pub fn new(controller_name: &str) -> Self {
        Self { controller_name: controller_name.to_owned() }
    }

    pub fn set_http_route_condition(&self, route: &mut HttpRouteView, parent: &ParentRef, condition: Condition) -> bool {
        self.set_route_condition(&mut route.status, parent, condition)
    }

    pub fn set_tcp_route_condition(&self, route: &mut TcpRouteView, parent: &ParentRef, condition: Condition) -> bool {
        self.set_route_condition(&mut route.status, parent, condition)
    }

    pub fn remove_http_route_references(&self, route: &mut HttpRouteView, parents: &[ParentRef]) -> bool {
        self.remove_route_references(&mut route.status, parents)
    }

    pub fn remove_tcp_route_references(&self, route: &mut TcpRouteView, parents: &[ParentRef]) -> bool {
        self.remove_route_references(&mut route.status, parents)
    }

    /// Sets the condition on the parent status owned by this controller, adding the parent
    /// status if there is none. Returns true when the status changed.
    pub fn set_route_condition(&self, status: &mut RouteStatusView, parent: &ParentRef, condition: Condition) -> bool {
        if let Some(existing) = status.parents.iter_mut().find(|p| p.parent_ref == *parent && p.controller_name == self.controller_name) {
            return set_condition(&mut existing.conditions, condition);
        }
        status.parents.push(RouteParentStatus {
            parent_ref: parent.clone(),
            controller_name: self.controller_name.clone(),
            conditions: vec![condition],
        });
        true
    }

    pub fn remove_route_references(&self, status: &mut RouteStatusView, parents: &[ParentRef]) -> bool {
        let before = status.parents.len();
        status.parents.retain(|p| p.controller_name != self.controller_name || !parents.contains(&p.parent_ref));
        before != status.parents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{conditions::new_condition, ResourceKey};

    fn parent(name: &str) -> ParentRef {
        ParentRef { name: name.to_owned(), ..Default::default() }
    }

    #[test]
    fn test_setting_same_condition_twice_is_a_noop() {
        let setter = StatusSetter::new("meshgate.io/controller");
        let mut route = HttpRouteView { key: ResourceKey::http_route("apps", "route"), ..Default::default() };
        assert!(setter.set_http_route_condition(&mut route, &parent("gateway"), new_condition("Accepted", true, "Accepted", "route accepted", Some(1))));
        assert!(!setter.set_http_route_condition(&mut route, &parent("gateway"), new_condition("Accepted", true, "Accepted", "route accepted", Some(1))));
        assert!(setter.set_http_route_condition(&mut route, &parent("gateway"), new_condition("Accepted", true, "Accepted", "route accepted", Some(2))));
        assert!(setter.set_http_route_condition(&mut route, &parent("gateway"), new_condition("ResolvedRefs", true, "ResolvedRefs", "resolved", Some(2))));
        assert_eq!(route.status.parents.len(), 1);
        assert_eq!(route.status.parents[0].conditions.len(), 2);
    }

    #[test]
    fn test_other_controllers_are_left_alone() {
        let setter = StatusSetter::new("meshgate.io/controller");
        let mut route = TcpRouteView {
            status: RouteStatusView {
                parents: vec![RouteParentStatus { parent_ref: parent("gateway"), controller_name: "example.com/other".to_owned(), conditions: vec![] }],
            },
            ..Default::default()
        };
        assert!(setter.set_tcp_route_condition(&mut route, &parent("gateway"), new_condition("Accepted", false, "NoMatchingParent", "no matching parent", None)));
        assert_eq!(route.status.parents.len(), 2);

        assert!(setter.remove_tcp_route_references(&mut route, &[parent("gateway")]));
        assert_eq!(route.status.parents.len(), 1);
        assert_eq!(route.status.parents[0].controller_name, "example.com/other");
        assert!(!setter.remove_tcp_route_references(&mut route, &[parent("gateway")]));
    }
}
